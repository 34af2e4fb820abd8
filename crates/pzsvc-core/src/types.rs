//! Per-request data model

use crate::error::{Error, ErrorKind};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Caller-facing name or identifier → local filename (inbound) or artifact
/// identifier (outbound).
pub type FileRecord = BTreeMap<String, String>;

/// The kinds of output a request can ask to have uploaded.
///
/// Each kind carries its own catalog data type and mime type, and decides
/// whether the file travels as a binary part or inline in the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Raster,
    Text,
    GeoJson,
}

impl OutputKind {
    /// Data type name understood by the catalog
    pub fn data_type(&self) -> &'static str {
        match self {
            OutputKind::Raster => "raster",
            OutputKind::Text => "text",
            OutputKind::GeoJson => "geojson",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputKind::Raster => "image/tiff",
            OutputKind::Text => "application/text",
            OutputKind::GeoJson => "application/vnd.geo+json",
        }
    }

    /// Textual kinds ship their content inside the JSON payload instead of
    /// as a file part.
    pub fn embeds_content(&self) -> bool {
        matches!(self, OutputKind::Text)
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.data_type())
    }
}

/// Split a command fragment on spaces. Empty input and repeated spaces never
/// contribute tokens.
pub fn split_tokens(input: &str) -> Vec<String> {
    input
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a comma-separated identifier/filename list.
pub fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// One accepted execute request. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Caller parameter string, appended to the configured base command
    pub cmd: String,
    /// Artifact identifiers to download into the workspace
    pub in_files: Vec<String>,
    pub out_tiffs: Vec<String>,
    pub out_txts: Vec<String>,
    pub out_geojson: Vec<String>,
    /// Per-request credential override
    pub auth_key: Option<String>,
}

impl ExecutionRequest {
    /// Build a request from the raw form values of the execute endpoint.
    pub fn from_form(
        cmd: &str,
        in_files: &str,
        out_tiffs: &str,
        out_txts: &str,
        out_geojson: &str,
        auth_key: &str,
    ) -> Self {
        Self {
            cmd: cmd.to_string(),
            in_files: split_list(in_files),
            out_tiffs: split_list(out_tiffs),
            out_txts: split_list(out_txts),
            out_geojson: split_list(out_geojson),
            auth_key: Some(auth_key.to_string()).filter(|k| !k.is_empty()),
        }
    }

    /// The three output lists, tagged with their kind
    pub fn outputs(&self) -> [(OutputKind, &[String]); 3] {
        [
            (OutputKind::Raster, self.out_tiffs.as_slice()),
            (OutputKind::Text, self.out_txts.as_slice()),
            (OutputKind::GeoJson, self.out_geojson.as_slice()),
        ]
    }

    /// Whether anything has to be moved to or from the catalog
    pub fn has_file_operations(&self) -> bool {
        !self.in_files.is_empty() || self.outputs().iter().any(|(_, files)| !files.is_empty())
    }

    /// Configured base command tokens followed by the caller's tokens.
    pub fn argv(&self, base_command: &str) -> Vec<String> {
        let mut argv = split_tokens(base_command);
        argv.extend(split_tokens(&self.cmd));
        argv
    }
}

/// Aggregate outcome of one request. Serialized as the execute response body.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
    #[serde(rename = "InFiles")]
    pub in_files: FileRecord,

    #[serde(rename = "OutFiles")]
    pub out_files: FileRecord,

    #[serde(rename = "ProgReturn")]
    pub prog_return: String,

    #[serde(rename = "Errors")]
    pub errors: Vec<String>,

    #[serde(skip)]
    first_failure: Option<ErrorKind>,
}

impl ExecutionResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an error. The first one recorded fixes the failure kind.
    pub fn record(&mut self, err: &Error) {
        self.record_message(err.kind(), err.to_string());
    }

    pub fn record_message(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.first_failure.get_or_insert(kind);
        self.errors.push(message.into());
    }

    /// Kind of the first recorded error, if any
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        self.first_failure
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}
