//! Transfer Client
//!
//! Authenticated downloads from, and ingest uploads to, the catalog. Every
//! call carries the caller's credential verbatim in the `Authorization`
//! header; a blank credential is refused before anything goes on the wire.

use crate::error::{CatalogError, Result};
use crate::ingest::IngestMetadata;
use crate::model::{IngestCall, JobStatus, JobStatusResponse, JobSubmitted};
use crate::poller::{JobPoller, JobReport, JobStatusSource};
use async_trait::async_trait;
use pzsvc_core::OutputKind;
use reqwest::header::{AUTHORIZATION, CONTENT_DISPOSITION};
use reqwest::multipart::{Form, Part};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Where request inputs come from and outputs go to
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch `data_id` into `dir`, returning the local filename.
    async fn download(&self, data_id: &str, dir: &Path, credential: &str) -> Result<String>;

    /// Ingest `dir/file_name` and wait for the resulting artifact id.
    async fn upload(
        &self,
        file_name: &str,
        dir: &Path,
        kind: OutputKind,
        metadata: &IngestMetadata,
        credential: &str,
    ) -> Result<String>;
}

/// HTTP client for the catalog/job API
#[derive(Clone)]
pub struct CatalogClient {
    base_url: String,
    http: reqwest::Client,
    poller: JobPoller,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_poller(base_url, JobPoller::default())
    }

    pub fn with_poller(base_url: impl Into<String>, poller: JobPoller) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("pzsvc-exec/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            poller,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Submit an ingest and return the job id the catalog assigned.
    ///
    /// Binary kinds go multipart to `/job` with the JSON in a `body` field
    /// and the bytes in a `file` part. Textual kinds go as a plain JSON
    /// body to `/data`, their content already inside the call.
    pub async fn submit_ingest(
        &self,
        call: &IngestCall,
        kind: OutputKind,
        file: Option<(&str, Vec<u8>)>,
        credential: &str,
    ) -> Result<String> {
        let credential = require_credential(credential)?;
        let name = call.job_type.data.metadata.name.clone();

        let request = if kind.embeds_content() {
            self.http.post(self.url("data")).json(call)
        } else {
            let mut form = Form::new().text("body", serde_json::to_string(call)?);
            if let Some((file_name, bytes)) = file {
                form = form.part("file", Part::bytes(bytes).file_name(file_name.to_string()));
            }
            self.http.post(self.url("job")).multipart(form)
        };

        let response = request.header(AUTHORIZATION, credential).send().await?;
        let body = checked_text(response).await?;
        debug!(file = %name, response = %body, "Ingest submitted");

        let submitted: JobSubmitted = serde_json::from_str(&body)?;
        if submitted.job_id.is_empty() {
            return Err(CatalogError::NoJobId { file: name, body });
        }
        Ok(submitted.job_id)
    }
}

#[async_trait]
impl ArtifactStore for CatalogClient {
    async fn download(&self, data_id: &str, dir: &Path, credential: &str) -> Result<String> {
        let credential = require_credential(credential)?;
        let url = self.url(&format!("file/{}", data_id));

        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, credential)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Status {
                status: status.as_u16(),
                url,
                body,
            });
        }

        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_filename)
            .ok_or_else(|| CatalogError::UnnamedFile {
                data_id: data_id.to_string(),
            })?;

        let mut response = response;
        let mut out = tokio::fs::File::create(dir.join(&file_name)).await?;
        let mut written = 0usize;
        while let Some(chunk) = response.chunk().await? {
            out.write_all(&chunk).await?;
            written += chunk.len();
        }
        out.flush().await?;

        info!(data_id = %data_id, file = %file_name, bytes = written, "Downloaded input");
        Ok(file_name)
    }

    async fn upload(
        &self,
        file_name: &str,
        dir: &Path,
        kind: OutputKind,
        metadata: &IngestMetadata,
        credential: &str,
    ) -> Result<String> {
        require_credential(credential)?;
        let path = workspace_file(dir, file_name)?;
        let bytes = tokio::fs::read(path).await?;

        let job_id = if kind.embeds_content() {
            let content = String::from_utf8(bytes).map_err(|_| CatalogError::InvalidText {
                file: file_name.to_string(),
            })?;
            let call = metadata.ingest_call(file_name, kind, Some(content));
            self.submit_ingest(&call, kind, None, credential).await?
        } else {
            let call = metadata.ingest_call(file_name, kind, None);
            self.submit_ingest(&call, kind, Some((file_name, bytes)), credential)
                .await?
        };

        info!(file = %file_name, kind = %kind, job_id = %job_id, "Ingest accepted, polling for result");
        let data_id = self.poller.resolve(self, &job_id, credential).await?;
        info!(file = %file_name, data_id = %data_id, "Ingest finished");
        Ok(data_id)
    }
}

#[async_trait]
impl JobStatusSource for CatalogClient {
    async fn job_status(&self, job_id: &str, credential: &str) -> Result<JobReport> {
        let credential = require_credential(credential)?;
        let raw = self
            .http
            .get(self.url(&format!("job/{}", job_id)))
            .header(AUTHORIZATION, credential)
            .send()
            .await?
            .text()
            .await?;

        // Not-yet-known jobs come back with an error status and a JSON
        // message, so the body is interpreted whatever the status code.
        let parsed: JobStatusResponse = serde_json::from_str(&raw)?;
        let result = parsed.result.unwrap_or_default();
        let message = [parsed.message.as_str(), result.message.as_str(), result.details.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");

        Ok(JobReport {
            status: JobStatus::parse(&parsed.status, &parsed.message),
            data_id: Some(result.data_id).filter(|id| !id.is_empty()),
            message,
            raw,
        })
    }
}

fn require_credential(credential: &str) -> Result<&str> {
    if credential.is_empty() {
        Err(CatalogError::MissingCredential)
    } else {
        Ok(credential)
    }
}

/// Resolve a caller-named output inside `dir`. Absolute names and any `..`
/// or root component are refused.
pub(crate) fn workspace_file(dir: &Path, file_name: &str) -> Result<PathBuf> {
    let relative = Path::new(file_name);
    let plain = !file_name.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !plain {
        return Err(CatalogError::OutsideWorkspace {
            file: file_name.to_string(),
        });
    }
    Ok(dir.join(relative))
}

async fn checked_text(response: reqwest::Response) -> Result<String> {
    let status = response.status();
    let url = response.url().to_string();
    let body = response.text().await?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(CatalogError::Status {
            status: status.as_u16(),
            url,
            body,
        })
    }
}

/// Pull the `filename` parameter out of a Content-Disposition value.
///
/// Only the final path component is kept so a hostile name cannot escape
/// the workspace.
pub(crate) fn disposition_filename(value: &str) -> Option<String> {
    let raw = value
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("filename"))
        .map(|(_, v)| v.trim().trim_matches('"'))?;

    Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && *n != "..")
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::{PollPolicy, Sleeper};
    use axum::extract::{Multipart, Path as UrlPath, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// In-memory stand-in for the catalog: ingests complete after one
    /// "Pending" answer and their content can be downloaded again.
    #[derive(Default)]
    struct FakeCatalog {
        files: Mutex<HashMap<String, (String, Vec<u8>)>>,
        polls: Mutex<HashMap<String, u32>>,
        ingests: Mutex<Vec<Value>>,
        auth_seen: Mutex<Vec<String>>,
        fail_jobs: bool,
    }

    impl FakeCatalog {
        fn note_auth(&self, headers: &HeaderMap) {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            self.auth_seen.lock().unwrap().push(auth);
        }

        fn store(&self, name: String, bytes: Vec<u8>, call: Value) -> String {
            let mut files = self.files.lock().unwrap();
            let id = format!("data-{}", files.len() + 1);
            files.insert(id.clone(), (name, bytes));
            self.ingests.lock().unwrap().push(call);
            format!("job-{}", id)
        }
    }

    type Shared = Arc<FakeCatalog>;

    async fn get_file(
        State(cat): State<Shared>,
        UrlPath(id): UrlPath<String>,
        headers: HeaderMap,
    ) -> impl IntoResponse {
        cat.note_auth(&headers);
        let entry = cat.files.lock().unwrap().get(&id).cloned();
        match entry {
            Some((name, bytes)) if !name.is_empty() => (
                StatusCode::OK,
                [("content-disposition", format!("attachment; filename=\"{}\"", name))],
                bytes,
            )
                .into_response(),
            Some((_, bytes)) => (StatusCode::OK, bytes).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn post_data(
        State(cat): State<Shared>,
        headers: HeaderMap,
        Json(call): Json<Value>,
    ) -> Json<Value> {
        cat.note_auth(&headers);
        let data = &call["jobType"]["data"];
        let name = data["metadata"]["name"].as_str().unwrap_or_default().to_string();
        let bytes = data["dataType"]["content"].as_str().unwrap_or_default().as_bytes().to_vec();
        let job_id = cat.store(name, bytes, call.clone());
        Json(json!({ "type": "job", "jobId": job_id }))
    }

    async fn post_job(
        State(cat): State<Shared>,
        headers: HeaderMap,
        mut multipart: Multipart,
    ) -> Json<Value> {
        cat.note_auth(&headers);
        let mut call = Value::Null;
        let mut file = (String::new(), Vec::new());
        while let Some(field) = multipart.next_field().await.unwrap() {
            let part = field.name().unwrap_or_default().to_string();
            match part.as_str() {
                "body" => call = serde_json::from_str(&field.text().await.unwrap()).unwrap(),
                "file" => {
                    let name = field.file_name().unwrap_or_default().to_string();
                    file = (name, field.bytes().await.unwrap().to_vec());
                }
                _ => {}
            }
        }
        let job_id = cat.store(file.0, file.1, call);
        Json(json!({ "type": "job", "jobId": job_id }))
    }

    async fn get_job(
        State(cat): State<Shared>,
        UrlPath(job_id): UrlPath<String>,
        headers: HeaderMap,
    ) -> impl IntoResponse {
        cat.note_auth(&headers);
        let mut polls = cat.polls.lock().unwrap();
        let count = polls.entry(job_id.clone()).or_insert(0);
        *count += 1;
        let body = match (*count, cat.fail_jobs) {
            (1, _) => json!({ "status": "Pending" }),
            (_, true) => json!({ "status": "Error", "message": "ingest exploded" }),
            _ => json!({
                "status": "Success",
                "result": { "type": "data", "dataId": job_id.trim_start_matches("job-") }
            }),
        };
        Json(body)
    }

    async fn spawn_catalog(cat: Shared) -> String {
        let router = Router::new()
            .route("/file/:id", get(get_file))
            .route("/data", post(post_data))
            .route("/job", post(post_job))
            .route("/job/:id", get(get_job))
            .with_state(cat);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    struct NoSleep;

    #[async_trait]
    impl Sleeper for NoSleep {
        async fn sleep(&self, _duration: Duration) {}
    }

    fn client(base: String) -> CatalogClient {
        let poller = JobPoller::with_sleeper(
            PollPolicy {
                max_attempts: 5,
                ..Default::default()
            },
            Arc::new(NoSleep),
        );
        CatalogClient::with_poller(base, poller).unwrap()
    }

    #[test]
    fn test_disposition_filename() {
        assert_eq!(
            disposition_filename("attachment; filename=\"scene.tif\"").as_deref(),
            Some("scene.tif")
        );
        assert_eq!(
            disposition_filename("attachment; FileName=plain.txt").as_deref(),
            Some("plain.txt")
        );
        assert_eq!(
            disposition_filename("attachment; filename=\"../../etc/passwd\"").as_deref(),
            Some("passwd")
        );
        assert_eq!(disposition_filename("attachment"), None);
        assert_eq!(disposition_filename("attachment; filename=\"\""), None);
    }

    #[test]
    fn test_url_joining() {
        let c = CatalogClient::new("http://pz.example/").unwrap();
        assert_eq!(c.base_url(), "http://pz.example");
        assert_eq!(c.url("/job/1"), "http://pz.example/job/1");
    }

    #[tokio::test]
    async fn test_download_writes_named_file() {
        let cat = Shared::default();
        cat.files
            .lock()
            .unwrap()
            .insert("d1".into(), ("scene.tif".into(), b"TIFFDATA".to_vec()));
        let client = client(spawn_catalog(cat.clone()).await);
        let dir = tempfile::tempdir().unwrap();

        let name = client.download("d1", dir.path(), "Basic abc").await.unwrap();

        assert_eq!(name, "scene.tif");
        assert_eq!(std::fs::read(dir.path().join("scene.tif")).unwrap(), b"TIFFDATA");
        assert_eq!(*cat.auth_seen.lock().unwrap(), vec!["Basic abc".to_string()]);
    }

    #[tokio::test]
    async fn test_download_without_filename_is_protocol_error() {
        let cat = Shared::default();
        cat.files
            .lock()
            .unwrap()
            .insert("d1".into(), (String::new(), b"x".to_vec()));
        let client = client(spawn_catalog(cat).await);
        let dir = tempfile::tempdir().unwrap();

        let err = client.download("d1", dir.path(), "key").await.unwrap_err();

        assert!(matches!(err, CatalogError::UnnamedFile { ref data_id } if data_id == "d1"));
        assert!(err.is_protocol());
    }

    #[tokio::test]
    async fn test_download_missing_artifact_reports_status() {
        let client = client(spawn_catalog(Shared::default()).await);
        let dir = tempfile::tempdir().unwrap();
        let err = client.download("nope", dir.path(), "key").await.unwrap_err();
        assert!(matches!(err, CatalogError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_missing_credential_never_hits_network() {
        // Nothing listens here; reaching the network would be an Http error.
        let client = client("http://127.0.0.1:9".to_string());
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out.txt"), "abc").unwrap();

        let err = client.download("d1", dir.path(), "").await.unwrap_err();
        assert!(matches!(err, CatalogError::MissingCredential));

        let err = client
            .upload("out.txt", dir.path(), OutputKind::Text, &IngestMetadata::default(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::MissingCredential));
    }

    #[tokio::test]
    async fn test_text_upload_round_trips() {
        let cat = Shared::default();
        let client = client(spawn_catalog(cat.clone()).await);
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out.txt"), "abc").unwrap();
        let meta = IngestMetadata {
            service_name: "algo".into(),
            version: "1.0".into(),
            ..Default::default()
        };

        let data_id = client
            .upload("out.txt", dir.path(), OutputKind::Text, &meta, "key")
            .await
            .unwrap();
        assert_eq!(data_id, "data-1");

        let ingest = cat.ingests.lock().unwrap()[0].clone();
        assert_eq!(ingest["jobType"]["data"]["dataType"]["type"], "text");
        assert_eq!(ingest["jobType"]["data"]["metadata"]["version"], "1.0");

        let back = tempfile::tempdir().unwrap();
        let name = client.download(&data_id, back.path(), "key").await.unwrap();
        assert_eq!(std::fs::read(back.path().join(name)).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_raster_upload_is_multipart() {
        let cat = Shared::default();
        let client = client(spawn_catalog(cat.clone()).await);
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out.tif"), [0x49, 0x49, 0x2a, 0x00]).unwrap();

        let data_id = client
            .upload("out.tif", dir.path(), OutputKind::Raster, &IngestMetadata::default(), "key")
            .await
            .unwrap();

        let files = cat.files.lock().unwrap();
        let (name, bytes) = &files[&data_id];
        assert_eq!(name, "out.tif");
        assert_eq!(bytes, &vec![0x49, 0x49, 0x2a, 0x00]);
        let ingest = &cat.ingests.lock().unwrap()[0];
        assert_eq!(ingest["jobType"]["data"]["dataType"]["mimeType"], "image/tiff");
        assert_eq!(ingest["jobType"]["data"]["dataType"]["content"], "");
    }

    #[tokio::test]
    async fn test_failed_job_surfaces_message() {
        let cat = Arc::new(FakeCatalog {
            fail_jobs: true,
            ..Default::default()
        });
        let client = client(spawn_catalog(cat).await);
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out.geojson"), "{}").unwrap();

        let err = client
            .upload("out.geojson", dir.path(), OutputKind::GeoJson, &IngestMetadata::default(), "key")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("ingest exploded"));
    }

    #[test]
    fn test_workspace_file_stays_inside() {
        let dir = Path::new("/srv/ws");
        assert_eq!(workspace_file(dir, "out.txt").unwrap(), dir.join("out.txt"));
        assert_eq!(workspace_file(dir, "sub/out.tif").unwrap(), dir.join("sub/out.tif"));

        for name in ["", "../secret.txt", "../../proc/self/environ", "sub/../../x", "/etc/passwd"] {
            assert!(
                matches!(workspace_file(dir, name), Err(CatalogError::OutsideWorkspace { .. })),
                "{} accepted",
                name
            );
        }
    }

    #[tokio::test]
    async fn test_upload_refuses_files_outside_workspace() {
        let cat = Shared::default();
        let client = client(spawn_catalog(cat.clone()).await);
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("secret.txt"), "TOPSECRET").unwrap();
        let ws = root.path().join("ws");
        std::fs::create_dir(&ws).unwrap();

        let err = client
            .upload("../secret.txt", &ws, OutputKind::Text, &IngestMetadata::default(), "key")
            .await
            .unwrap_err();

        assert!(matches!(err, CatalogError::OutsideWorkspace { .. }));
        assert!(cat.ingests.lock().unwrap().is_empty());
        assert!(cat.files.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_of_missing_file_is_io_error() {
        let client = client("http://127.0.0.1:9".to_string());
        let dir = tempfile::tempdir().unwrap();
        let err = client
            .upload("absent.tif", dir.path(), OutputKind::Raster, &IngestMetadata::default(), "key")
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Io(_)));
    }
}
