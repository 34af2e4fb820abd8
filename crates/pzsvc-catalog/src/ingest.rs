//! Ingest payload construction

use crate::model::{
    ClassType, DataResource, DataType, IngestCall, IngestJobType, ResourceMetadata,
};
use chrono::{DateTime, Utc};
use pzsvc_core::OutputKind;
use std::collections::BTreeMap;

/// Submitting user recorded on every ingest
const INGEST_USER: &str = "defaultUser";

/// Who produced an output and under which attributes it is filed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestMetadata {
    pub service_name: String,
    pub version: String,
    pub attributes: BTreeMap<String, String>,
}

impl IngestMetadata {
    /// Attributes describing one run of the wrapped program.
    pub fn for_run(
        service_name: &str,
        version: &str,
        cli_cmd: &str,
        cmd: &str,
        processed_at: DateTime<Utc>,
    ) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert("algoName".to_string(), service_name.to_string());
        attributes.insert("algoVersion".to_string(), version.to_string());
        attributes.insert("algoCmd".to_string(), format!("{} {}", cli_cmd, cmd));
        attributes.insert("algoProcTime".to_string(), proc_time(processed_at));

        Self {
            service_name: service_name.to_string(),
            version: version.to_string(),
            attributes,
        }
    }

    /// Build the ingest request body for one file.
    ///
    /// `content` is only used by kinds that embed their payload.
    pub fn ingest_call(&self, file_name: &str, kind: OutputKind, content: Option<String>) -> IngestCall {
        let content = if kind.embeds_content() {
            content.unwrap_or_default()
        } else {
            String::new()
        };

        IngestCall {
            user_name: INGEST_USER.to_string(),
            job_type: IngestJobType {
                kind: "ingest".to_string(),
                host: true,
                data: DataResource {
                    data_type: DataType {
                        content,
                        kind: kind.data_type().to_string(),
                        mime_type: kind.mime_type().to_string(),
                    },
                    metadata: ResourceMetadata {
                        name: file_name.to_string(),
                        description: format!("{} uploaded by {}.", kind, self.service_name),
                        class_type: ClassType::default(),
                        method: "POST".to_string(),
                        version: self.version.clone(),
                        metadata: self.attributes.clone(),
                    },
                },
            },
        }
    }
}

/// `YYYYMMDD.HHMMSS[.f]`: the fraction is truncated to five digits and
/// loses its trailing zeros, and its dot too when nothing is left.
fn proc_time(at: DateTime<Utc>) -> String {
    let stamp = at.format("%Y%m%d.%H%M%S").to_string();
    let fraction = format!("{:05}", at.timestamp_subsec_nanos() / 10_000);
    match fraction.trim_end_matches('0') {
        "" => stamp,
        digits => format!("{}.{}", stamp, digits),
    }
}
