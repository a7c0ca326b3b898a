#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use serde_json::{Value, json};

use bcm_transfer::bcm::{BcmClient, Collection, ReadsAsset, SampleAsset};
use bcm_transfer::de::{DeClient, DeObject, DeProject};
use bcm_transfer::domain::{ReadFiles, SampleRecord};
use bcm_transfer::error::TransferError;
use bcm_transfer::pipeline::{ProgressEvent, ProgressSink, SourceEntry};
use bcm_transfer::scratch::Scratch;

pub const HEADER: &str = "SAMPLE\tCOLLECTION\tPAIRED\tFASTQ_R1\tFASTQ_R2\tSEQ_TYPE\tEXTRACTION_PROTOCOL\tLIBRARY_CONSTRUCTION_PROTOCOL\tTREATMENT_PROTOCOL\tGROWTH_PROTOCOL\tANNOTATOR\tSOURCE\tORGANISM\tSTRAIN\tGENOTYPE\tMOLECULE\tLIBRARY_STRATEGY\tTISSUE\tAGE\tOTHER_CHAR_1\tOTHER_CHAR_2";

pub fn sheet(rows: &[&str]) -> String {
    let mut text = HEADER.to_string();
    for row in rows {
        text.push('\n');
        text.push_str(row);
    }
    text.push('\n');
    text
}

#[derive(Debug, Clone)]
pub struct Ingest {
    pub files: ReadFiles,
    pub collection: Option<u64>,
}

/// Sheet records as pipeline entries.
pub fn accepted(records: Vec<SampleRecord>) -> Vec<SourceEntry> {
    records.into_iter().map(Ok).collect()
}

#[derive(Default)]
pub struct BcmState {
    next_id: u64,
    pub collections: Vec<Collection>,
    pub created_collections: usize,
    pub collection_lookups: usize,
    pub reads: Vec<ReadsAsset>,
    pub data_links: Vec<(u64, u64)>,
    pub samples: Vec<(u64, SampleAsset)>,
    pub ingests: Vec<Ingest>,
    pub reads_descriptors: Vec<(u64, String, Value)>,
    pub sample_descriptors: Vec<(u64, String, Value)>,
    pub confirmed: Vec<u64>,
    pub sample_links: Vec<(u64, u64)>,
    pub reads_lookups: Vec<(String, Option<u64>)>,
}

impl BcmState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory destination server.
#[derive(Default)]
pub struct MockBcm {
    pub state: Mutex<BcmState>,
    pub fail_ingest: bool,
}

impl MockBcm {
    pub fn with_collection(name: &str) -> Self {
        let bcm = Self::default();
        {
            let mut state = bcm.state.lock().unwrap();
            let id = state.next_id();
            state.collections.push(Collection {
                id,
                name: name.to_string(),
            });
        }
        bcm
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, BcmState> {
        self.state.lock().unwrap()
    }
}

impl BcmClient for MockBcm {
    fn find_collection(&self, name: &str) -> Result<Option<Collection>, TransferError> {
        let mut state = self.state();
        state.collection_lookups += 1;
        Ok(state
            .collections
            .iter()
            .find(|collection| collection.name == name)
            .cloned())
    }

    fn create_collection(&self, name: &str) -> Result<Collection, TransferError> {
        let mut state = self.state();
        let id = state.next_id();
        let collection = Collection {
            id,
            name: name.to_string(),
        };
        state.collections.push(collection.clone());
        state.created_collections += 1;
        Ok(collection)
    }

    fn find_reads(
        &self,
        name: &str,
        collection: Option<&Collection>,
    ) -> Result<Option<ReadsAsset>, TransferError> {
        let mut state = self.state();
        state
            .reads_lookups
            .push((name.to_string(), collection.map(|collection| collection.id)));
        Ok(state
            .reads
            .iter()
            .filter(|reads| reads.name == name)
            .find(|reads| match collection {
                Some(collection) => state.data_links.contains(&(collection.id, reads.id)),
                None => true,
            })
            .cloned())
    }

    fn run_ingest(
        &self,
        files: &ReadFiles,
        collection: Option<&Collection>,
    ) -> Result<ReadsAsset, TransferError> {
        if self.fail_ingest {
            return Err(TransferError::ProcessFailed {
                data_id: 0,
                status: "ER".to_string(),
            });
        }
        let mut state = self.state();
        state.ingests.push(Ingest {
            files: files.clone(),
            collection: collection.map(|collection| collection.id),
        });
        let id = state.next_id();
        let reads = ReadsAsset {
            id,
            name: files
                .all_paths()
                .first()
                .and_then(|path| path.file_name())
                .unwrap_or_default()
                .to_string(),
        };
        state.reads.push(reads.clone());
        if let Some(collection) = collection {
            state.data_links.push((collection.id, id));
        }
        let sample_id = state.next_id();
        state.samples.push((
            id,
            SampleAsset {
                id: sample_id,
                name: reads.name.clone(),
                slug: format!("sample-{sample_id}"),
            },
        ));
        Ok(reads)
    }

    fn save_reads_descriptor(
        &self,
        reads: &ReadsAsset,
        schema: &str,
        descriptor: &Value,
    ) -> Result<(), TransferError> {
        self.state()
            .reads_descriptors
            .push((reads.id, schema.to_string(), descriptor.clone()));
        Ok(())
    }

    fn sample_of(&self, reads: &ReadsAsset) -> Result<SampleAsset, TransferError> {
        self.state()
            .samples
            .iter()
            .find(|(reads_id, _)| *reads_id == reads.id)
            .map(|(_, sample)| sample.clone())
            .ok_or(TransferError::SampleNotFound(reads.id))
    }

    fn rename_sample(
        &self,
        sample: &SampleAsset,
        name: &str,
        slug: &str,
    ) -> Result<SampleAsset, TransferError> {
        let mut state = self.state();
        let (_, stored) = state
            .samples
            .iter_mut()
            .find(|(_, stored)| stored.id == sample.id)
            .ok_or(TransferError::SampleNotFound(sample.id))?;
        stored.name = name.to_string();
        stored.slug = slug.to_string();
        Ok(stored.clone())
    }

    fn save_sample_descriptor(
        &self,
        sample: &SampleAsset,
        schema: &str,
        descriptor: &Value,
    ) -> Result<(), TransferError> {
        self.state()
            .sample_descriptors
            .push((sample.id, schema.to_string(), descriptor.clone()));
        Ok(())
    }

    fn confirm_annotated(&self, sample: &SampleAsset) -> Result<(), TransferError> {
        self.state().confirmed.push(sample.id);
        Ok(())
    }

    fn add_sample(
        &self,
        collection: &Collection,
        sample: &SampleAsset,
    ) -> Result<(), TransferError> {
        let mut state = self.state();
        let link = (collection.id, sample.id);
        if !state.sample_links.contains(&link) {
            state.sample_links.push(link);
        }
        Ok(())
    }

    fn add_data(&self, collection: &Collection, reads: &ReadsAsset) -> Result<(), TransferError> {
        let mut state = self.state();
        let link = (collection.id, reads.id);
        if !state.data_links.contains(&link) {
            state.data_links.push(link);
        }
        Ok(())
    }
}

/// In-memory DictyExpress project.
pub struct MockDe {
    pub project: DeProject,
    pub objects: Vec<Value>,
    pub downloads: Mutex<Vec<String>>,
    pub fail_download: Option<String>,
}

impl MockDe {
    pub fn new(project_name: &str, objects: Vec<Value>) -> Self {
        Self {
            project: DeProject {
                id: "p1".to_string(),
                name: project_name.to_string(),
            },
            objects,
            downloads: Mutex::new(Vec::new()),
            fail_download: None,
        }
    }

    pub fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }
}

impl DeClient for MockDe {
    fn project(&self, project_id: &str) -> Result<DeProject, TransferError> {
        if project_id == self.project.id {
            Ok(self.project.clone())
        } else {
            Err(TransferError::DeProjectNotFound(project_id.to_string()))
        }
    }

    fn project_data(&self, _project_id: &str) -> Result<Vec<DeObject>, TransferError> {
        self.objects.iter().map(DeObject::from_value).collect()
    }

    fn download(
        &self,
        object_id: &str,
        filename: &str,
        destination: &Path,
    ) -> Result<(), TransferError> {
        self.downloads.lock().unwrap().push(filename.to_string());
        if self.fail_download.as_deref() == Some(filename) {
            fs::write(destination, b"@partial").unwrap();
            return Err(TransferError::DeHttp("connection reset".to_string()));
        }
        fs::write(destination, format!("@{object_id}/{filename}\nACGT\n+\nIIII\n")).unwrap();
        Ok(())
    }
}

/// Source client that must never be reached.
pub struct UnusedDe;

impl DeClient for UnusedDe {
    fn project(&self, _project_id: &str) -> Result<DeProject, TransferError> {
        panic!("source server reached during a sheet upload")
    }

    fn project_data(&self, _project_id: &str) -> Result<Vec<DeObject>, TransferError> {
        panic!("source server reached during a sheet upload")
    }

    fn download(
        &self,
        _object_id: &str,
        _filename: &str,
        _destination: &Path,
    ) -> Result<(), TransferError> {
        panic!("source server reached during a sheet upload")
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.message.clone())
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn scratch() -> (tempfile::TempDir, Scratch) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("scratch")).unwrap();
    (temp, Scratch::new(root))
}

pub fn de_reads(id: &str, name: &str, file: &str, file2: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "type": "data:reads:fastq:paired:",
        "output": {
            "fastq": {"file": file},
            "fastq2": {"file": file2}
        },
        "var": {
            "experimenter": "Gad Shaulsky",
            "experiment": "mutant screen",
            "sample": {
                "growth": "HL5 shaking",
                "treatment": "EMS",
                "strain": "AX4",
                "genotype": "wild type"
            },
            "seqrun": {
                "fragmenting": "sonication",
                "adapter": "Illumina HiSeq 2000",
                "center": "BCM HGSC"
            }
        }
    })
}
