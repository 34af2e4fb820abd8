//! Error types for catalog calls

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unreadable catalog response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot complete. Auth Key not available.")]
    MissingCredential,

    #[error("File for DataID {data_id} unnamed. Probable ingest error.")]
    UnnamedFile { data_id: String },

    #[error("Catalog returned HTTP {status} for {url}: {body}")]
    Status { status: u16, url: String, body: String },

    #[error("Ingest of {file} was not accepted: no job id in response {body}")]
    NoJobId { file: String, body: String },

    #[error("Job {job_id} succeeded without a DataId. Response json: {body}")]
    NoDataId { job_id: String, body: String },

    #[error("Job {job_id} failed with status {status}: {message}. Response json: {body}")]
    JobFailed {
        job_id: String,
        status: String,
        message: String,
        body: String,
    },

    #[error("Unknown status {status} for job {job_id}. Response json: {body}")]
    UnknownStatus {
        job_id: String,
        status: String,
        body: String,
    },

    #[error("Job {job_id} never completed after {attempts} status checks")]
    Timeout { job_id: String, attempts: u32 },

    #[error("Text output {file} is not valid UTF-8")]
    InvalidText { file: String },

    #[error("Output {file} does not name a file inside the workspace")]
    OutsideWorkspace { file: String },
}

pub type Result<T> = std::result::Result<T, CatalogError>;

impl CatalogError {
    /// Malformed or incomplete answers from the catalog, as opposed to
    /// transport or job failures.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            CatalogError::Json(_)
                | CatalogError::UnnamedFile { .. }
                | CatalogError::NoJobId { .. }
                | CatalogError::NoDataId { .. }
        )
    }
}

impl From<CatalogError> for pzsvc_core::Error {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::MissingCredential => pzsvc_core::Error::forbidden(err.to_string()),
            CatalogError::OutsideWorkspace { .. } => pzsvc_core::Error::client(err.to_string()),
            e if e.is_protocol() => pzsvc_core::Error::protocol(e.to_string()),
            e => pzsvc_core::Error::transfer(e.to_string()),
        }
    }
}
