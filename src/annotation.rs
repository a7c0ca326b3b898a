//! Descriptor documents attached to the destination reads and sample records.

use serde::Serialize;
use serde_json::Value;

use crate::domain::{AnnotationFields, Characteristic};
use crate::error::TransferError;

pub const READS_SCHEMA: &str = "reads";
pub const SAMPLE_SCHEMA: &str = "sample";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadsDescriptor {
    pub experiment_type: String,
    pub protocols: Protocols,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reads_info: Option<ReadsInfoDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Protocols {
    pub extract_protocol: String,
    pub library_prep: String,
    pub treatment_protocol: String,
    pub growth_protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragmentation_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadsInfoDescriptor {
    pub instrument_type: String,
    pub facility: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleDescriptor {
    pub sample: SampleAnnotation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleAnnotation {
    pub annotator: String,
    pub source: String,
    pub organism: String,
    pub strain: String,
    pub genotype: String,
    pub molecule: String,
    pub optional_char: Vec<String>,
}

pub fn reads_descriptor(fields: &AnnotationFields) -> ReadsDescriptor {
    ReadsDescriptor {
        experiment_type: fields.experiment_type.clone(),
        protocols: Protocols {
            extract_protocol: fields.extract_protocol.clone(),
            library_prep: fields.library_prep.clone(),
            treatment_protocol: fields.treatment_protocol.clone(),
            growth_protocol: fields.growth_protocol.clone(),
            fragmentation_method: fields.fragmentation_method.clone(),
        },
        reads_info: fields.reads_info.as_ref().map(|info| ReadsInfoDescriptor {
            instrument_type: info.instrument_type.clone(),
            facility: info.facility.clone(),
        }),
    }
}

pub fn sample_descriptor(fields: &AnnotationFields) -> SampleDescriptor {
    SampleDescriptor {
        sample: SampleAnnotation {
            annotator: fields.annotator.clone(),
            source: fields.source.clone(),
            organism: fields.organism.clone(),
            strain: fields.strain.clone(),
            genotype: fields.genotype.clone(),
            molecule: fields.molecule.clone(),
            optional_char: optional_characteristics(&fields.characteristics),
        },
    }
}

/// `KEY:VALUE` entries for every characteristic with a non-blank value.
pub fn optional_characteristics(characteristics: &[Characteristic]) -> Vec<String> {
    characteristics
        .iter()
        .filter(|item| !item.value.trim().is_empty())
        .map(|item| format!("{}:{}", item.key, item.value.trim()))
        .collect()
}

pub fn to_document<T: Serialize>(descriptor: &T) -> Result<Value, TransferError> {
    serde_json::to_value(descriptor).map_err(|err| TransferError::Descriptor(err.to_string()))
}
