//! pzsvc-catalog: client side of the external catalog/job API
//!
//! ```text
//! upload ──► POST /job (multipart) or POST /data (JSON) ──► job id
//!                                                            │
//!            JobPoller ◄── GET /job/<id> (repeat) ◄──────────┘
//!                │
//!                └──► artifact id (dataId)
//! download ──► GET /file/<id> ──► Content-Disposition filename + body
//! ```

pub mod client;
pub mod error;
pub mod ingest;
pub mod model;
pub mod poller;
pub mod registry;

pub use client::{ArtifactStore, CatalogClient};
pub use error::{CatalogError, Result};
pub use ingest::IngestMetadata;
pub use model::{IngestJob, JobStatus};
pub use poller::{JobPoller, JobReport, JobStatusSource, PollPolicy, Sleeper, TokioSleeper};
pub use registry::{ManageOutcome, ServiceRegistration};
