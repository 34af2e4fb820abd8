//! Wire types for the catalog/job API
//!
//! Request types are written in the catalog's camelCase. Response fields are
//! also accepted in the capitalised spelling some deployments emit.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Security classification attached to every ingest and registration
pub const CLASSIFICATION: &str = "UNCLASSIFIED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassType {
    pub classification: String,
}

impl Default for ClassType {
    fn default() -> Self {
        Self {
            classification: CLASSIFICATION.to_string(),
        }
    }
}

/// Descriptive metadata for a stored resource or a registered service.
/// The inner `metadata` map is passed through untouched by the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceMetadata {
    pub name: String,
    pub description: String,
    pub class_type: ClassType,
    pub method: String,
    pub version: String,
    pub metadata: BTreeMap<String, String>,
}

/// Payload description. `content` carries the data itself for textual
/// kinds and stays empty when the bytes travel as a file part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataType {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataResource {
    pub data_type: DataType,
    pub metadata: ResourceMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestJobType {
    #[serde(rename = "type")]
    pub kind: String,
    pub host: bool,
    pub data: DataResource,
}

/// Body of an ingest submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestCall {
    pub user_name: String,
    pub job_type: IngestJobType,
}

/// Immediate answer to an ingest submission
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobSubmitted {
    #[serde(rename = "type", alias = "Type")]
    pub kind: String,
    #[serde(rename = "jobId", alias = "JobID", alias = "JobId", alias = "jobID")]
    pub job_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DataResult {
    #[serde(rename = "dataId", alias = "DataID", alias = "DataId")]
    pub data_id: String,
    #[serde(alias = "Message")]
    pub message: String,
    #[serde(alias = "Details")]
    pub details: String,
}

/// Answer to a job status query
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobStatusResponse {
    #[serde(alias = "Status")]
    pub status: String,
    #[serde(alias = "Result")]
    pub result: Option<DataResult>,
    #[serde(alias = "Message")]
    pub message: String,
}

/// Status vocabulary of the external job system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Submitted,
    Running,
    Pending,
    Success,
    Error,
    Fail,
    /// The status record does not exist yet; seen right after submission
    NotFound,
    Unknown(String),
}

/// Message the job service returns before a status record exists
const JOB_NOT_FOUND: &str = "Job Not Found";

impl JobStatus {
    /// Interpret a raw status/message pair
    pub fn parse(status: &str, message: &str) -> Self {
        if message == JOB_NOT_FOUND {
            return JobStatus::NotFound;
        }
        match status {
            "Submitted" => JobStatus::Submitted,
            "Running" => JobStatus::Running,
            "Pending" => JobStatus::Pending,
            "Success" => JobStatus::Success,
            "Error" => JobStatus::Error,
            "Fail" => JobStatus::Fail,
            other => JobStatus::Unknown(other.to_string()),
        }
    }

    /// Worth asking again later
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            JobStatus::Submitted | JobStatus::Running | JobStatus::Pending | JobStatus::NotFound
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Submitted => write!(f, "Submitted"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Success => write!(f, "Success"),
            JobStatus::Error => write!(f, "Error"),
            JobStatus::Fail => write!(f, "Fail"),
            JobStatus::NotFound => write!(f, "NotFound"),
            JobStatus::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// An accepted ingest: lives from "upload accepted" until polling resolves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestJob {
    pub job_id: String,
    pub status: JobStatus,
}

impl IngestJob {
    pub fn submitted(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Submitted,
        }
    }
}

/// A service entry as registered with the catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Service {
    pub service_id: String,
    pub url: String,
    pub resource_metadata: ResourceMetadata,
}

/// List wrapper returned by service searches
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceList {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Vec<Service>,
}
