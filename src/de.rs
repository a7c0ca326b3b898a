//! DictyExpress (Genesis) source server: listing, annotation lookup and
//! raw file download for the migration path.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::{Credentials, MigrationDefaults};
use crate::domain::{
    AnnotationFields, Characteristic, CollectionName, Payload, ReadsInfo, RemoteReads,
    SampleName, SampleRecord,
};
use crate::error::TransferError;
use crate::pipeline::{RecordSource, RejectedRecord, SourceEntry};

const ANNOTATION_SECTIONS: &[&str] = &["input", "output", "var", "static"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeProject {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Flattened view over a data object's `input`/`output`/`var`/`static`
/// sections, addressed with dotted paths such as `var.sample.strain`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotation {
    sections: Map<String, Value>,
}

impl Annotation {
    pub fn from_object(object: &Value) -> Self {
        let sections = ANNOTATION_SECTIONS
            .iter()
            .filter_map(|name| object.get(*name).map(|value| (name.to_string(), value.clone())))
            .collect();
        Self { sections }
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.sections.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Scalar value as text; numbers and booleans are rendered.
    pub fn text(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Value::String(value) => Some(value.clone()),
            Value::Number(value) => Some(value.to_string()),
            Value::Bool(value) => Some(value.to_string()),
            _ => None,
        }
    }

    /// Name of the file stored in a file-typed field.
    pub fn file(&self, path: &str) -> Option<String> {
        self.get(path)?
            .get("file")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeObject {
    pub id: String,
    pub name: String,
    pub data_type: String,
    pub annotation: Annotation,
}

impl DeObject {
    pub fn from_value(value: &Value) -> Result<Self, TransferError> {
        let id = match value.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(TransferError::DeResponse(
                    "data object without id".to_string(),
                ));
            }
        };
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Ok(Self {
            id,
            name: text("name"),
            data_type: text("type"),
            annotation: Annotation::from_object(value),
        })
    }

    fn required_text(&self, path: &str) -> Result<String, TransferError> {
        self.annotation
            .text(path)
            .ok_or_else(|| self.missing(path))
    }

    fn required_file(&self, path: &str) -> Result<String, TransferError> {
        self.annotation
            .file(path)
            .ok_or_else(|| self.missing(path))
    }

    fn missing(&self, path: &str) -> TransferError {
        TransferError::MissingAnnotation {
            object: format!("{} ({})", self.name, self.id),
            field: path.to_string(),
        }
    }
}

pub trait DeClient {
    fn project(&self, project_id: &str) -> Result<DeProject, TransferError>;
    fn project_data(&self, project_id: &str) -> Result<Vec<DeObject>, TransferError>;
    fn download(
        &self,
        object_id: &str,
        filename: &str,
        destination: &Path,
    ) -> Result<(), TransferError>;
}

pub struct DeHttpClient {
    client: Client,
    base_url: String,
}

impl DeHttpClient {
    pub fn new(base_url: &str) -> Result<Self, TransferError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("bcm-transfer/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TransferError::DeHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(Duration::from_secs(3600))
            .build()
            .map_err(|err| TransferError::DeHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn connect(base_url: &str, credentials: &Credentials) -> Result<Self, TransferError> {
        let client = Self::new(base_url)?;
        client.login(credentials)?;
        Ok(client)
    }

    pub fn login(&self, credentials: &Credentials) -> Result<(), TransferError> {
        let url = format!("{}/user/ajax/login/", self.base_url);
        debug!(%url, user = %credentials.user, "dictyexpress login");
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "email": credentials.user,
                "password": credentials.password,
            }))
            .send()
            .map_err(|err| TransferError::DeHttp(err.to_string()))?;
        Self::handle_status(response)?;
        Ok(())
    }

    fn handle_status(response: Response) -> Result<Response, TransferError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "DictyExpress request failed".to_string());
        Err(TransferError::DeStatus { status, message })
    }

    fn get_objects(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<Value>, TransferError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, ?query, "dictyexpress list");
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .map_err(|err| TransferError::DeHttp(err.to_string()))?;
        let value: Value = Self::handle_status(response)?
            .json()
            .map_err(|err| TransferError::DeResponse(err.to_string()))?;
        objects_of(value)
    }
}

impl DeClient for DeHttpClient {
    fn project(&self, project_id: &str) -> Result<DeProject, TransferError> {
        self.get_objects("/api/v1/case", &[("limit", "0")])?
            .into_iter()
            .map(serde_json::from_value::<DeProject>)
            .filter_map(Result::ok)
            .find(|project| project.id == project_id)
            .ok_or_else(|| TransferError::DeProjectNotFound(project_id.to_string()))
    }

    fn project_data(&self, project_id: &str) -> Result<Vec<DeObject>, TransferError> {
        self.get_objects(
            "/api/v1/data",
            &[("case_ids__contains", project_id), ("limit", "0")],
        )?
        .iter()
        .map(DeObject::from_value)
        .collect()
    }

    fn download(
        &self,
        object_id: &str,
        filename: &str,
        destination: &Path,
    ) -> Result<(), TransferError> {
        let url = format!("{}/data/{}/{}", self.base_url, object_id, filename);
        debug!(%url, "dictyexpress download");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| TransferError::DeHttp(err.to_string()))?;
        let mut response = Self::handle_status(response)?;
        let mut file =
            File::create(destination).map_err(|err| TransferError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| TransferError::DeHttp(err.to_string()))?;
        Ok(())
    }
}

/// Entries for every object of a project whose type starts with `data_type`.
/// An object with incomplete annotation becomes a rejected entry.
pub struct DeProjectSource<'a, D: DeClient> {
    client: &'a D,
    project_id: String,
    data_type: String,
    defaults: MigrationDefaults,
}

impl<'a, D: DeClient> DeProjectSource<'a, D> {
    pub fn new(
        client: &'a D,
        project_id: impl Into<String>,
        data_type: impl Into<String>,
        defaults: MigrationDefaults,
    ) -> Self {
        Self {
            client,
            project_id: project_id.into(),
            data_type: data_type.into(),
            defaults,
        }
    }
}

impl<D: DeClient> RecordSource for DeProjectSource<'_, D> {
    fn records(&self) -> Result<Vec<SourceEntry>, TransferError> {
        let project = self.client.project(&self.project_id)?;
        let collection = CollectionName::from_optional(&project.name);
        let entries = self
            .client
            .project_data(&self.project_id)?
            .iter()
            .filter(|object| object.data_type.starts_with(&self.data_type))
            .map(|object| {
                record_from_object(collection.clone(), object, &self.defaults).map_err(|error| {
                    RejectedRecord {
                        name: object.name.clone(),
                        collection: collection.clone(),
                        error,
                    }
                })
            })
            .collect();
        Ok(entries)
    }
}

pub fn record_from_object(
    collection: Option<CollectionName>,
    object: &DeObject,
    defaults: &MigrationDefaults,
) -> Result<SampleRecord, TransferError> {
    let name: SampleName = object.name.parse()?;
    let experiment = object.required_text("var.experiment")?;

    let annotation = AnnotationFields {
        experiment_type: defaults.experiment_type.clone(),
        extract_protocol: defaults.extract_protocol.clone(),
        library_prep: defaults.library_prep.clone(),
        treatment_protocol: object.required_text("var.sample.treatment")?,
        growth_protocol: object.required_text("var.sample.growth")?,
        fragmentation_method: Some(object.required_text("var.seqrun.fragmenting")?),
        reads_info: Some(ReadsInfo {
            instrument_type: object.required_text("var.seqrun.adapter")?,
            facility: object.required_text("var.seqrun.center")?,
        }),
        annotator: object.required_text("var.experimenter")?,
        source: experiment.clone(),
        organism: defaults.organism.clone(),
        strain: object.required_text("var.sample.strain")?,
        genotype: object.required_text("var.sample.genotype")?,
        molecule: defaults.molecule.clone(),
        characteristics: vec![Characteristic::new("screen", experiment)],
    };

    Ok(SampleRecord {
        name,
        collection,
        payload: Payload::Remote(RemoteReads {
            object_id: object.id.clone(),
            file: object.required_file("output.fastq")?,
            file2: object.required_file("output.fastq2")?,
        }),
        annotation,
    })
}

/// Genesis list endpoints wrap results in `{"objects": [...]}`.
fn objects_of(value: Value) -> Result<Vec<Value>, TransferError> {
    match value {
        Value::Object(mut map) => match map.remove("objects") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(TransferError::DeResponse("expected an objects list".to_string())),
        },
        Value::Array(items) => Ok(items),
        _ => Err(TransferError::DeResponse("expected an objects list".to_string())),
    }
}
