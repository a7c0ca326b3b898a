use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Clone, Error, Diagnostic)]
pub enum TransferError {
    #[error("failed to read sample sheet at {0}")]
    SheetRead(PathBuf),

    #[error("malformed sample sheet at line {line}: {message}")]
    SheetParse { line: u64, message: String },

    #[error("sample sheet is missing required column {0}")]
    #[diagnostic(help("the header row must name every required column"))]
    MissingColumn(String),

    #[error("sample {sample}: required field {field} is empty")]
    MissingField { sample: String, field: String },

    #[error("sample {sample}: invalid PAIRED option {value:?} (expected \"0\" or \"1\")")]
    InvalidPairedFlag { sample: String, value: String },

    #[error("sample {sample}: FASTQ_R1 lists {r1} file(s) but FASTQ_R2 lists {r2}")]
    MismatchedReadLists { sample: String, r1: usize, r2: usize },

    #[error("duplicate sample name in sample sheet: {0}")]
    DuplicateSample(String),

    #[error("invalid sample name: {0:?}")]
    #[diagnostic(help("sample names become slugs; use letters, digits, '.', '_' or '-'"))]
    InvalidSampleName(String),

    #[error("invalid scratch file name: {0:?}")]
    InvalidFilename(String),

    #[error("missing config file bcm-transfer.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("BCM request failed: {0}")]
    BcmHttp(String),

    #[error("BCM returned status {status}: {message}")]
    BcmStatus { status: u16, message: String },

    #[error("unexpected BCM response: {0}")]
    BcmResponse(String),

    #[error("more than one collection is named {0:?}")]
    AmbiguousCollection(String),

    #[error("ingestion of data object {data_id} ended with status {status}")]
    ProcessFailed { data_id: u64, status: String },

    #[error("no sample is attached to data object {0}")]
    SampleNotFound(u64),

    #[error("DictyExpress request failed: {0}")]
    DeHttp(String),

    #[error("DictyExpress returned status {status}: {message}")]
    DeStatus { status: u16, message: String },

    #[error("unexpected DictyExpress response: {0}")]
    DeResponse(String),

    #[error("DictyExpress project not found: {0}")]
    DeProjectNotFound(String),

    #[error("data object {object} has no annotation field {field}")]
    MissingAnnotation { object: String, field: String },

    #[error("failed to build descriptor document: {0}")]
    Descriptor(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("{failed} record(s) failed to transfer")]
    RunIncomplete { failed: usize },
}

impl TransferError {
    /// Process exit code: 2 for bad input or configuration, 3 for server
    /// failures, 4 for a run that finished with failed records.
    pub fn exit_code(&self) -> u8 {
        match self {
            TransferError::SheetRead(_)
            | TransferError::SheetParse { .. }
            | TransferError::MissingColumn(_)
            | TransferError::MissingField { .. }
            | TransferError::InvalidPairedFlag { .. }
            | TransferError::MismatchedReadLists { .. }
            | TransferError::DuplicateSample(_)
            | TransferError::InvalidSampleName(_)
            | TransferError::InvalidFilename(_)
            | TransferError::MissingConfig
            | TransferError::ConfigRead(_)
            | TransferError::ConfigParse(_)
            | TransferError::MissingCredential(_)
            | TransferError::MissingAnnotation { .. } => 2,
            TransferError::BcmHttp(_)
            | TransferError::BcmStatus { .. }
            | TransferError::BcmResponse(_)
            | TransferError::AmbiguousCollection(_)
            | TransferError::ProcessFailed { .. }
            | TransferError::SampleNotFound(_)
            | TransferError::DeHttp(_)
            | TransferError::DeStatus { .. }
            | TransferError::DeResponse(_)
            | TransferError::DeProjectNotFound(_) => 3,
            TransferError::RunIncomplete { .. } => 4,
            TransferError::Descriptor(_) | TransferError::Filesystem(_) => 1,
        }
    }
}
