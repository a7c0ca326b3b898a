use std::fs::File;
use std::io::Read;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::Method;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::Credentials;
use crate::domain::{ReadFiles, ReadLayout};
use crate::error::TransferError;

const UPLOAD_CHUNK_SIZE: u64 = 8 * 1024 * 1024;
const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadsAsset {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleAsset {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
}

/// Destination ingestion pipelines for raw FASTQ files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestProcess {
    SingleEnd,
    PairedEnd,
}

impl IngestProcess {
    pub fn for_layout(layout: ReadLayout) -> Self {
        match layout {
            ReadLayout::Single => IngestProcess::SingleEnd,
            ReadLayout::Paired => IngestProcess::PairedEnd,
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            IngestProcess::SingleEnd => "upload-fastq-single",
            IngestProcess::PairedEnd => "upload-fastq-paired",
        }
    }
}

/// Operations the pipeline needs from the destination server.
///
/// Lookups return `Ok(None)` on a miss; only transport and server failures are
/// errors.
pub trait BcmClient {
    fn find_collection(&self, name: &str) -> Result<Option<Collection>, TransferError>;
    fn create_collection(&self, name: &str) -> Result<Collection, TransferError>;
    fn find_reads(
        &self,
        name: &str,
        collection: Option<&Collection>,
    ) -> Result<Option<ReadsAsset>, TransferError>;
    fn run_ingest(
        &self,
        files: &ReadFiles,
        collection: Option<&Collection>,
    ) -> Result<ReadsAsset, TransferError>;
    fn save_reads_descriptor(
        &self,
        reads: &ReadsAsset,
        schema: &str,
        descriptor: &Value,
    ) -> Result<(), TransferError>;
    fn sample_of(&self, reads: &ReadsAsset) -> Result<SampleAsset, TransferError>;
    fn rename_sample(
        &self,
        sample: &SampleAsset,
        name: &str,
        slug: &str,
    ) -> Result<SampleAsset, TransferError>;
    fn save_sample_descriptor(
        &self,
        sample: &SampleAsset,
        schema: &str,
        descriptor: &Value,
    ) -> Result<(), TransferError>;
    fn confirm_annotated(&self, sample: &SampleAsset) -> Result<(), TransferError>;
    fn add_sample(&self, collection: &Collection, sample: &SampleAsset)
    -> Result<(), TransferError>;
    fn add_data(&self, collection: &Collection, reads: &ReadsAsset) -> Result<(), TransferError>;
}

/// Resolwe REST client with a logged-in session.
pub struct BcmHttpClient {
    client: Client,
    base_url: String,
    csrf_token: Option<String>,
    upload_session: String,
}

impl BcmHttpClient {
    pub fn new(base_url: &str) -> Result<Self, TransferError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("bcm-transfer/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TransferError::BcmHttp(err.to_string()))?,
        );
        headers.insert(
            REFERER,
            HeaderValue::from_str(&base_url)
                .map_err(|err| TransferError::BcmHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| TransferError::BcmHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url,
            csrf_token: None,
            upload_session: format!("bcm-transfer-{}", uuid::Uuid::new_v4()),
        })
    }

    pub fn connect(base_url: &str, credentials: &Credentials) -> Result<Self, TransferError> {
        let mut client = Self::new(base_url)?;
        client.login(credentials)?;
        Ok(client)
    }

    pub fn login(&mut self, credentials: &Credentials) -> Result<(), TransferError> {
        let url = self.url("/rest-auth/login/");
        debug!(%url, user = %credentials.user, "bcm login");
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "username": credentials.user,
                "password": credentials.password,
            }))
            .send()
            .map_err(|err| TransferError::BcmHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        self.csrf_token = response
            .cookies()
            .find(|cookie| cookie.name() == "csrftoken")
            .map(|cookie| cookie.value().to_string());
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.csrf_token {
            Some(token) => builder.header("X-CSRFToken", token),
            None => builder,
        }
    }

    fn handle_status(response: Response) -> Result<Response, TransferError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "BCM request failed".to_string());
        Err(TransferError::BcmStatus { status, message })
    }

    fn send(&self, builder: RequestBuilder) -> Result<Value, TransferError> {
        let response = builder
            .send()
            .map_err(|err| TransferError::BcmHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let text = response
            .text()
            .map_err(|err| TransferError::BcmHttp(err.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| TransferError::BcmResponse(err.to_string()))
    }

    fn get_list(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<Value>, TransferError> {
        debug!(path, ?query, "bcm list");
        let value = self.send(self.request(Method::GET, path).query(query))?;
        result_list(value)
    }

    fn send_json(&self, method: Method, path: &str, body: &Value) -> Result<Value, TransferError> {
        debug!(%method, path, "bcm request");
        self.send(self.request(method, path).json(body))
    }

    fn descriptor_schema_id(&self, slug: &str) -> Result<u64, TransferError> {
        let schemas = self.get_list("/api/descriptorschema", &[("slug", slug.to_string())])?;
        schemas
            .first()
            .and_then(|schema| schema.get("id"))
            .and_then(Value::as_u64)
            .ok_or_else(|| TransferError::BcmResponse(format!("unknown descriptor schema {slug}")))
    }

    /// Stages a local file on the server in chunks and returns the process input
    /// value that refers to it.
    fn upload_file(&self, path: &Utf8Path) -> Result<Value, TransferError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| TransferError::InvalidFilename(path.to_string()))?
            .to_string();
        let mut file = File::open(path.as_std_path())
            .map_err(|err| TransferError::Filesystem(format!("open {path}: {err}")))?;
        let total_size = file
            .metadata()
            .map_err(|err| TransferError::Filesystem(err.to_string()))?
            .len();
        let chunk_count = total_size.div_ceil(UPLOAD_CHUNK_SIZE).max(1);
        let file_uuid = uuid::Uuid::new_v4().to_string();

        debug!(%path, total_size, chunk_count, "bcm upload");
        let mut last = Value::Null;
        for chunk_number in 0..chunk_count {
            let mut chunk = Vec::new();
            (&mut file)
                .take(UPLOAD_CHUNK_SIZE)
                .read_to_end(&mut chunk)
                .map_err(|err| TransferError::Filesystem(format!("read {path}: {err}")))?;
            let form = Form::new()
                .text("_chunkNumber", chunk_number.to_string())
                .text("_chunkSize", UPLOAD_CHUNK_SIZE.to_string())
                .text("_currentChunkSize", chunk.len().to_string())
                .text("_totalSize", total_size.to_string())
                .text("name", file_name.clone())
                .part("file", Part::bytes(chunk).file_name(file_name.clone()));
            let builder = self
                .request(Method::POST, "/upload/")
                .header("Session-Id", &self.upload_session)
                .header("X-File-Uuid", &file_uuid)
                .multipart(form);
            last = self.send(builder)?;
        }

        let temp = uploaded_temp_name(&last)?;
        Ok(json!({ "file": file_name, "file_temp": temp }))
    }

    fn upload_all(&self, paths: &[Utf8PathBuf]) -> Result<Value, TransferError> {
        let uploaded = paths
            .iter()
            .map(|path| self.upload_file(path))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Array(uploaded))
    }

    fn wait_for_data(&self, id: u64) -> Result<(), TransferError> {
        loop {
            let value = self.send(self.request(Method::GET, &format!("/api/data/{id}")))?;
            let status = value
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match DataStatus::from_code(&status) {
                Some(DataStatus::Done) => return Ok(()),
                Some(DataStatus::Failed) => {
                    return Err(TransferError::ProcessFailed {
                        data_id: id,
                        status,
                    });
                }
                Some(DataStatus::Running) => {
                    debug!(id, %status, "waiting for ingestion");
                    thread::sleep(POLL_INTERVAL);
                }
                None => {
                    return Err(TransferError::BcmResponse(format!(
                        "data object {id} has unknown status {status:?}"
                    )));
                }
            }
        }
    }
}

impl BcmClient for BcmHttpClient {
    fn find_collection(&self, name: &str) -> Result<Option<Collection>, TransferError> {
        let items = self.get_list("/api/collection", &[("name", name.to_string())])?;
        let mut matches = parse_all::<Collection>(items)?
            .into_iter()
            .filter(|collection| collection.name == name)
            .collect::<Vec<_>>();
        if matches.len() > 1 {
            return Err(TransferError::AmbiguousCollection(name.to_string()));
        }
        Ok(matches.pop())
    }

    fn create_collection(&self, name: &str) -> Result<Collection, TransferError> {
        let value = self.send_json(Method::POST, "/api/collection", &json!({ "name": name }))?;
        parse(value)
    }

    fn find_reads(
        &self,
        name: &str,
        collection: Option<&Collection>,
    ) -> Result<Option<ReadsAsset>, TransferError> {
        let mut query = vec![("name", name.to_string())];
        if let Some(collection) = collection {
            query.push(("collection", collection.id.to_string()));
        }
        let items = self.get_list("/api/data", &query)?;
        let matches = parse_all::<ReadsAsset>(items)?
            .into_iter()
            .filter(|reads| reads.name == name)
            .collect::<Vec<_>>();
        if matches.len() > 1 {
            warn!(name, count = matches.len(), "several data objects share a name; using the first");
        }
        Ok(matches.into_iter().next())
    }

    fn run_ingest(
        &self,
        files: &ReadFiles,
        collection: Option<&Collection>,
    ) -> Result<ReadsAsset, TransferError> {
        let body = ingest_body(files, collection, |paths| self.upload_all(paths))?;
        let reads: ReadsAsset = parse(self.send_json(Method::POST, "/api/data", &body)?)?;
        self.wait_for_data(reads.id)?;
        Ok(reads)
    }

    fn save_reads_descriptor(
        &self,
        reads: &ReadsAsset,
        schema: &str,
        descriptor: &Value,
    ) -> Result<(), TransferError> {
        let schema_id = self.descriptor_schema_id(schema)?;
        self.send_json(
            Method::PATCH,
            &format!("/api/data/{}", reads.id),
            &json!({ "descriptor_schema": schema_id, "descriptor": descriptor }),
        )?;
        Ok(())
    }

    fn sample_of(&self, reads: &ReadsAsset) -> Result<SampleAsset, TransferError> {
        let items = self.get_list("/api/sample", &[("data", reads.id.to_string())])?;
        parse_all::<SampleAsset>(items)?
            .into_iter()
            .next()
            .ok_or(TransferError::SampleNotFound(reads.id))
    }

    fn rename_sample(
        &self,
        sample: &SampleAsset,
        name: &str,
        slug: &str,
    ) -> Result<SampleAsset, TransferError> {
        let value = self.send_json(
            Method::PATCH,
            &format!("/api/sample/{}", sample.id),
            &json!({ "name": name, "slug": slug }),
        )?;
        parse(value)
    }

    fn save_sample_descriptor(
        &self,
        sample: &SampleAsset,
        schema: &str,
        descriptor: &Value,
    ) -> Result<(), TransferError> {
        let schema_id = self.descriptor_schema_id(schema)?;
        self.send_json(
            Method::PATCH,
            &format!("/api/sample/{}", sample.id),
            &json!({ "descriptor_schema": schema_id, "descriptor": descriptor }),
        )?;
        Ok(())
    }

    fn confirm_annotated(&self, sample: &SampleAsset) -> Result<(), TransferError> {
        self.send_json(
            Method::PATCH,
            &format!("/api/sample/{}", sample.id),
            &json!({ "descriptor_completed": true }),
        )?;
        Ok(())
    }

    fn add_sample(
        &self,
        collection: &Collection,
        sample: &SampleAsset,
    ) -> Result<(), TransferError> {
        self.send_json(
            Method::POST,
            &format!("/api/collection/{}/add_entity", collection.id),
            &json!({ "ids": [sample.id] }),
        )?;
        Ok(())
    }

    fn add_data(&self, collection: &Collection, reads: &ReadsAsset) -> Result<(), TransferError> {
        self.send_json(
            Method::POST,
            &format!("/api/collection/{}/add_data", collection.id),
            &json!({ "ids": [reads.id] }),
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataStatus {
    Running,
    Done,
    Failed,
}

impl DataStatus {
    /// Resolwe status codes; `None` for anything else.
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "OK" => Some(DataStatus::Done),
            "ER" | "DR" => Some(DataStatus::Failed),
            "UP" | "RE" | "WT" | "PP" | "PR" => Some(DataStatus::Running),
            _ => None,
        }
    }
}

/// Request body that runs the ingestion process for `files`. `stage` turns a
/// path list into the process input that refers to the uploaded files.
fn ingest_body<F>(
    files: &ReadFiles,
    collection: Option<&Collection>,
    mut stage: F,
) -> Result<Value, TransferError>
where
    F: FnMut(&[Utf8PathBuf]) -> Result<Value, TransferError>,
{
    let input = match files {
        ReadFiles::Single(src) => json!({ "src": stage(src)? }),
        ReadFiles::Paired { r1, r2 } => json!({
            "src1": stage(r1)?,
            "src2": stage(r2)?,
        }),
    };
    let process = IngestProcess::for_layout(files.layout());
    let mut body = json!({
        "process": { "slug": process.slug() },
        "input": input,
    });
    if let Some(collection) = collection {
        body["collection"] = json!({ "id": collection.id });
    }
    Ok(body)
}

/// Accepts both bare JSON arrays and paginated `{"results": [...]}` bodies.
fn result_list(value: Value) -> Result<Vec<Value>, TransferError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(TransferError::BcmResponse(
                "expected a list of resources".to_string(),
            )),
        },
        _ => Err(TransferError::BcmResponse(
            "expected a list of resources".to_string(),
        )),
    }
}

fn uploaded_temp_name(value: &Value) -> Result<String, TransferError> {
    value
        .get("files")
        .and_then(|files| files.get(0))
        .and_then(|file| file.get("temp"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| TransferError::BcmResponse("upload response has no temp file".to_string()))
}

fn parse<T: DeserializeOwned>(value: Value) -> Result<T, TransferError> {
    serde_json::from_value(value).map_err(|err| TransferError::BcmResponse(err.to_string()))
}

fn parse_all<T: DeserializeOwned>(items: Vec<Value>) -> Result<Vec<T>, TransferError> {
    items.into_iter().map(parse).collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn process_follows_layout() {
        assert_eq!(
            IngestProcess::for_layout(ReadLayout::Single).slug(),
            "upload-fastq-single"
        );
        assert_eq!(
            IngestProcess::for_layout(ReadLayout::Paired).slug(),
            "upload-fastq-paired"
        );
    }

    #[test]
    fn result_list_accepts_pagination() {
        let plain = result_list(json!([{ "id": 1 }])).unwrap();
        assert_eq!(plain.len(), 1);
        let paged = result_list(json!({ "count": 2, "results": [{ "id": 1 }, { "id": 2 }] }))
            .unwrap();
        assert_eq!(paged.len(), 2);
        let err = result_list(json!({ "detail": "nope" })).unwrap_err();
        assert_matches!(err, TransferError::BcmResponse(_));
    }

    #[test]
    fn parses_resources_ignoring_extra_fields() {
        let sample: SampleAsset =
            parse(json!({ "id": 7, "name": "S1", "slug": "s1", "descriptor": {} })).unwrap();
        assert_eq!(sample.id, 7);
        assert_eq!(sample.slug, "s1");
        let reads: ReadsAsset = parse(json!({ "id": 3 })).unwrap();
        assert_eq!(reads.name, "");
    }

    #[test]
    fn upload_temp_name() {
        let value = json!({ "files": [{ "name": "a.fastq", "temp": "abc123" }] });
        assert_eq!(uploaded_temp_name(&value).unwrap(), "abc123");
        assert_matches!(
            uploaded_temp_name(&json!({})),
            Err(TransferError::BcmResponse(_))
        );
    }

    #[test]
    fn data_status_codes() {
        assert_eq!(DataStatus::from_code("OK"), Some(DataStatus::Done));
        assert_eq!(DataStatus::from_code("ER"), Some(DataStatus::Failed));
        assert_eq!(DataStatus::from_code("PR"), Some(DataStatus::Running));
        assert_eq!(DataStatus::from_code("UP"), Some(DataStatus::Running));
    }

    #[test]
    fn missing_or_unknown_status_is_not_waited_on() {
        assert_eq!(DataStatus::from_code(""), None);
        assert_eq!(DataStatus::from_code("XX"), None);
    }

    fn staged_names(paths: &[Utf8PathBuf]) -> Result<Value, TransferError> {
        Ok(json!(
            paths
                .iter()
                .map(|path| path.file_name().unwrap_or_default())
                .collect::<Vec<_>>()
        ))
    }

    #[test]
    fn paired_body_keeps_mates_apart() {
        let files = ReadFiles::Paired {
            r1: vec!["/d/a1.fq".into(), "/d/a2.fq".into()],
            r2: vec!["/d/b1.fq".into(), "/d/b2.fq".into()],
        };
        let collection = Collection {
            id: 4,
            name: "C1".to_string(),
        };
        let body = ingest_body(&files, Some(&collection), staged_names).unwrap();
        assert_eq!(
            body,
            json!({
                "process": { "slug": "upload-fastq-paired" },
                "input": {
                    "src1": ["a1.fq", "a2.fq"],
                    "src2": ["b1.fq", "b2.fq"]
                },
                "collection": { "id": 4 }
            })
        );
    }

    #[test]
    fn single_body_without_collection() {
        let files = ReadFiles::Single(vec!["/d/s1.fq".into()]);
        let body = ingest_body(&files, None, staged_names).unwrap();
        assert_eq!(
            body,
            json!({
                "process": { "slug": "upload-fastq-single" },
                "input": { "src": ["s1.fq"] }
            })
        );
    }

    #[test]
    fn base_url_is_normalised() {
        let client = BcmHttpClient::new("https://bcm.example.org/").unwrap();
        assert_eq!(client.url("/api/data"), "https://bcm.example.org/api/data");
    }
}
