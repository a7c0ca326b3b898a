//! The record pipeline shared by sheet uploads and server migrations:
//! Resolve Collection, Transfer Payload, then Annotate & Link.

use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{info, warn};

use crate::annotation::{
    READS_SCHEMA, SAMPLE_SCHEMA, reads_descriptor, sample_descriptor, to_document,
};
use crate::bcm::{BcmClient, Collection, ReadsAsset};
use crate::de::DeClient;
use crate::domain::{
    CollectionName, Payload, ReadFiles, RecordStage, RemoteReads, SampleRecord, TransferAction,
};
use crate::error::TransferError;
use crate::scratch::Scratch;

/// A source item that could not be turned into a record. It fails on its own
/// when the run reaches it.
#[derive(Debug, Clone)]
pub struct RejectedRecord {
    pub name: String,
    pub collection: Option<CollectionName>,
    pub error: TransferError,
}

pub type SourceEntry = Result<SampleRecord, RejectedRecord>;

/// Produces validated entries before any destination call is made. An `Err`
/// from `records` rejects the whole source.
pub trait RecordSource {
    fn records(&self) -> Result<Vec<SourceEntry>, TransferError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransferOptions {
    /// Record failures in the report and continue with the next record.
    pub keep_going: bool,
    /// Only read-only lookups; nothing is uploaded, downloaded or changed.
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub started_at: String,
    pub finished_at: String,
    pub items: Vec<RecordOutcome>,
}

impl TransferReport {
    pub fn count(&self, action: TransferAction) -> usize {
        self.items.iter().filter(|item| item.action == action).count()
    }

    pub fn failures(&self) -> usize {
        self.count(TransferAction::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    pub name: String,
    pub collection: Option<String>,
    pub action: TransferAction,
    pub stage: RecordStage,
    pub reads_id: Option<u64>,
    pub sample_id: Option<u64>,
    pub error: Option<String>,
}

impl RecordOutcome {
    fn pending(record: &SampleRecord) -> Self {
        Self::new(record.name.as_str(), record.collection.as_ref())
    }

    fn rejected(rejected: &RejectedRecord) -> Self {
        Self::new(&rejected.name, rejected.collection.as_ref())
    }

    fn new(name: &str, collection: Option<&CollectionName>) -> Self {
        Self {
            name: name.to_string(),
            collection: collection.map(|name| name.as_str().to_string()),
            action: TransferAction::Planned,
            stage: RecordStage::Pending,
            reads_id: None,
            sample_id: None,
            error: None,
        }
    }
}

/// Looks a collection up by name and creates it on a miss.
pub fn resolve_collection<B: BcmClient>(bcm: &B, name: &str) -> Result<Collection, TransferError> {
    if let Some(collection) = bcm.find_collection(name)? {
        info!(collection = %name, id = collection.id, "using existing collection");
        return Ok(collection);
    }
    let collection = bcm.create_collection(name)?;
    info!(collection = %name, id = collection.id, "created collection");
    Ok(collection)
}

pub struct Transfer<B: BcmClient, D: DeClient> {
    bcm: B,
    de: D,
    scratch: Scratch,
}

impl<B: BcmClient, D: DeClient> Transfer<B, D> {
    pub fn new(bcm: B, de: D, scratch: Scratch) -> Self {
        Self { bcm, de, scratch }
    }

    pub fn bcm(&self) -> &B {
        &self.bcm
    }

    pub fn de(&self) -> &D {
        &self.de
    }

    pub fn scratch(&self) -> &Scratch {
        &self.scratch
    }

    /// Carries every entry through the pipeline, one after another. Rejected
    /// entries fail in their turn.
    ///
    /// Without `keep_going` the first failure is returned as is. With it, the
    /// failure is recorded on the record's outcome and the run continues.
    pub fn run(
        &self,
        entries: &[SourceEntry],
        options: TransferOptions,
        sink: &dyn ProgressSink,
    ) -> Result<TransferReport, TransferError> {
        let started_at = iso_timestamp();
        let mut items = Vec::with_capacity(entries.len());

        for entry in entries {
            let (mut outcome, result) = match entry {
                Ok(record) => {
                    let mut outcome = RecordOutcome::pending(record);
                    let result = if options.dry_run {
                        self.plan_record(record, &mut outcome)
                    } else {
                        self.transfer_record(record, &mut outcome, sink)
                    };
                    (outcome, result)
                }
                Err(rejected) => (
                    RecordOutcome::rejected(rejected),
                    Err(rejected.error.clone()),
                ),
            };
            if let Err(err) = result {
                warn!(sample = %outcome.name, stage = %outcome.stage, error = %err, "record failed");
                if !options.keep_going {
                    return Err(err);
                }
                sink.event(ProgressEvent {
                    message: format!("phase=Failed; {}: {err}", outcome.name),
                    elapsed: None,
                });
                outcome.action = TransferAction::Failed;
                outcome.error = Some(err.to_string());
            }
            items.push(outcome);
        }

        Ok(TransferReport {
            started_at,
            finished_at: iso_timestamp(),
            items,
        })
    }

    fn transfer_record(
        &self,
        record: &SampleRecord,
        outcome: &mut RecordOutcome,
        sink: &dyn ProgressSink,
    ) -> Result<(), TransferError> {
        let collection = match &record.collection {
            Some(name) => {
                sink.event(ProgressEvent {
                    message: format!("phase=Resolve; collection {name}"),
                    elapsed: None,
                });
                Some(resolve_collection(&self.bcm, name.as_str())?)
            }
            None => {
                info!(sample = %record.name, "record has no collection; linking skipped");
                None
            }
        };
        outcome.stage = RecordStage::CollectionResolved;

        let (reads, action) = match &record.payload {
            Payload::Local(files) => (
                self.upload(record.name.as_str(), files, collection.as_ref(), sink)?,
                TransferAction::Uploaded,
            ),
            Payload::Remote(remote) => self.transfer_remote(remote, collection.as_ref(), sink)?,
        };
        outcome.action = action;
        outcome.reads_id = Some(reads.id);
        outcome.stage = RecordStage::PayloadTransferred;

        let reads_document = to_document(&reads_descriptor(&record.annotation))?;
        self.bcm
            .save_reads_descriptor(&reads, READS_SCHEMA, &reads_document)?;
        let sample = self.bcm.sample_of(&reads)?;
        let sample = self
            .bcm
            .rename_sample(&sample, record.name.as_str(), &record.name.slug())?;
        let sample_document = to_document(&sample_descriptor(&record.annotation))?;
        self.bcm
            .save_sample_descriptor(&sample, SAMPLE_SCHEMA, &sample_document)?;
        outcome.sample_id = Some(sample.id);
        outcome.stage = RecordStage::Annotated;
        info!(sample = %record.name, reads = reads.id, id = sample.id, "annotated");

        self.bcm.confirm_annotated(&sample)?;
        outcome.stage = RecordStage::Confirmed;
        if let Some(collection) = &collection {
            self.bcm.add_sample(collection, &sample)?;
            outcome.stage = RecordStage::Linked;
        }

        if let Payload::Remote(remote) = &record.payload {
            self.cleanup(remote)?;
            outcome.stage = RecordStage::Cleaned;
        }

        sink.event(ProgressEvent {
            message: format!("phase=Done; {} ({})", record.name, outcome.stage),
            elapsed: None,
        });
        Ok(())
    }

    /// Read-only pass: reports what a real run would do.
    fn plan_record(
        &self,
        record: &SampleRecord,
        outcome: &mut RecordOutcome,
    ) -> Result<(), TransferError> {
        let Payload::Remote(remote) = &record.payload else {
            return Ok(());
        };
        let collection = match &record.collection {
            Some(name) => match self.bcm.find_collection(name.as_str())? {
                Some(collection) => Some(collection),
                None => return Ok(()),
            },
            None => None,
        };
        if let Some(reads) = self.bcm.find_reads(&remote.file, collection.as_ref())? {
            outcome.action = TransferAction::AlreadyPresent;
            outcome.reads_id = Some(reads.id);
        }
        Ok(())
    }

    fn upload(
        &self,
        label: &str,
        files: &ReadFiles,
        collection: Option<&Collection>,
        sink: &dyn ProgressSink,
    ) -> Result<ReadsAsset, TransferError> {
        sink.event(ProgressEvent {
            message: format!("phase=Upload; {label} ({} reads)", files.layout()),
            elapsed: None,
        });
        let start = Instant::now();
        let reads = self.bcm.run_ingest(files, collection)?;
        sink.event(ProgressEvent {
            message: format!("phase=Upload; {label} uploaded as data {}", reads.id),
            elapsed: Some(start.elapsed()),
        });
        Ok(reads)
    }

    fn transfer_remote(
        &self,
        remote: &RemoteReads,
        collection: Option<&Collection>,
        sink: &dyn ProgressSink,
    ) -> Result<(ReadsAsset, TransferAction), TransferError> {
        if let Some(existing) = self.bcm.find_reads(&remote.file, collection)? {
            info!(file = %remote.file, id = existing.id, "reads already on destination");
            sink.event(ProgressEvent {
                message: format!("phase=Upload; {} already uploaded", remote.file),
                elapsed: None,
            });
            return Ok((existing, TransferAction::AlreadyPresent));
        }

        self.scratch.ensure_root()?;
        let r1 = self.download(remote, &remote.file, sink)?;
        let r2 = self.download(remote, &remote.file2, sink)?;
        let files = ReadFiles::Paired {
            r1: vec![r1],
            r2: vec![r2],
        };
        let reads = self.upload(&remote.file, &files, None, sink)?;
        if let Some(collection) = collection {
            self.bcm.add_data(collection, &reads)?;
        }
        Ok((reads, TransferAction::Uploaded))
    }

    fn download(
        &self,
        remote: &RemoteReads,
        filename: &str,
        sink: &dyn ProgressSink,
    ) -> Result<Utf8PathBuf, TransferError> {
        let path = self.scratch.path_for(filename)?;
        if self.scratch.is_downloaded(&path) {
            info!(%path, "reusing downloaded file");
            sink.event(ProgressEvent {
                message: format!("phase=Download; {filename} already downloaded"),
                elapsed: None,
            });
            return Ok(path);
        }

        sink.event(ProgressEvent {
            message: format!("phase=Download; {filename}"),
            elapsed: None,
        });
        let start = Instant::now();
        let size = self.scratch.fetch_atomic(&path, |temp| {
            self.de.download(&remote.object_id, filename, temp)
        })?;
        sink.event(ProgressEvent {
            message: format!("phase=Download; {filename} finished ({size} bytes)"),
            elapsed: Some(start.elapsed()),
        });
        Ok(path)
    }

    fn cleanup(&self, remote: &RemoteReads) -> Result<(), TransferError> {
        for filename in [&remote.file, &remote.file2] {
            let path = self.scratch.path_for(filename)?;
            if !self.scratch.remove(&path)? {
                warn!(%path, "scratch file already removed");
            }
        }
        Ok(())
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
