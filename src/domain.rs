use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use camino::Utf8PathBuf;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TransferError;

static NON_SLUG_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

/// Sample identifier. Used verbatim as the destination sample's display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleName(String);

impl SampleName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Slug for the destination sample. Equal to the name whenever the name is
    /// already slug-safe.
    pub fn slug(&self) -> String {
        NON_SLUG_CHARS
            .replace_all(&self.0, "-")
            .trim_matches('-')
            .to_string()
    }
}

impl fmt::Display for SampleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SampleName {
    type Err = TransferError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && !normalized.chars().any(|ch| ch.is_control())
            && normalized.chars().any(|ch| ch.is_ascii_alphanumeric());
        if !is_valid {
            return Err(TransferError::InvalidSampleName(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionName(String);

impl CollectionName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `None` for blank names: such records are migrated without a collection.
    pub fn from_optional(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadLayout {
    Single,
    Paired,
}

impl ReadLayout {
    /// Sample sheet `PAIRED` column: `"0"` single-end, `"1"` paired-end.
    pub fn from_flag(value: &str) -> Option<Self> {
        match value.trim() {
            "0" => Some(ReadLayout::Single),
            "1" => Some(ReadLayout::Paired),
            _ => None,
        }
    }
}

impl fmt::Display for ReadLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadLayout::Single => write!(f, "single"),
            ReadLayout::Paired => write!(f, "paired"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadFiles {
    Single(Vec<Utf8PathBuf>),
    Paired {
        r1: Vec<Utf8PathBuf>,
        r2: Vec<Utf8PathBuf>,
    },
}

impl ReadFiles {
    pub fn layout(&self) -> ReadLayout {
        match self {
            ReadFiles::Single(_) => ReadLayout::Single,
            ReadFiles::Paired { .. } => ReadLayout::Paired,
        }
    }

    pub fn all_paths(&self) -> Vec<&Utf8PathBuf> {
        match self {
            ReadFiles::Single(src) => src.iter().collect(),
            ReadFiles::Paired { r1, r2 } => r1.iter().chain(r2.iter()).collect(),
        }
    }
}

/// A paired-end reads object living on the source server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteReads {
    pub object_id: String,
    pub file: String,
    pub file2: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Local(ReadFiles),
    Remote(RemoteReads),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadsInfo {
    pub instrument_type: String,
    pub facility: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub key: String,
    pub value: String,
}

impl Characteristic {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationFields {
    pub experiment_type: String,
    pub extract_protocol: String,
    pub library_prep: String,
    pub treatment_protocol: String,
    pub growth_protocol: String,
    pub fragmentation_method: Option<String>,
    pub reads_info: Option<ReadsInfo>,
    pub annotator: String,
    pub source: String,
    pub organism: String,
    pub strain: String,
    pub genotype: String,
    pub molecule: String,
    pub characteristics: Vec<Characteristic>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    pub name: SampleName,
    pub collection: Option<CollectionName>,
    pub payload: Payload,
    pub annotation: AnnotationFields,
}

/// How far a record got through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStage {
    Pending,
    CollectionResolved,
    PayloadTransferred,
    Annotated,
    Confirmed,
    Linked,
    Cleaned,
}

impl fmt::Display for RecordStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecordStage::Pending => "pending",
            RecordStage::CollectionResolved => "collection_resolved",
            RecordStage::PayloadTransferred => "payload_transferred",
            RecordStage::Annotated => "annotated",
            RecordStage::Confirmed => "confirmed",
            RecordStage::Linked => "linked",
            RecordStage::Cleaned => "cleaned",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferAction {
    Uploaded,
    AlreadyPresent,
    Planned,
    Failed,
}
