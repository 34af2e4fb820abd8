//! pzsvc-core: shared vocabulary for pzsvc-exec
//!
//! Holds the per-request data model (what the caller asked for, what came
//! back), the error classification used to pick response statuses, and the
//! service configuration file format.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Capabilities, ServiceConfig};
pub use error::{Error, ErrorKind, Result};
pub use types::{split_list, split_tokens, ExecutionRequest, ExecutionResult, FileRecord, OutputKind};
