//! Service Configuration
//!
//! The service is configured by a single JSON file. Keys keep the names of
//! the deployment format (`CliCmd`, `PzAddr`, `AuthEnVar`, ...). Everything
//! is optional; `capabilities()` works out which features the file actually
//! enables and reports questionable combinations.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Port used when the config leaves `Port` unset or invalid
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServiceConfig {
    /// Base command; caller parameters are appended to it
    pub cli_cmd: String,
    /// Command whose stdout is the version of the wrapped program
    pub version_cmd: String,
    /// Static version, used when `VersionCmd` is blank
    pub version_str: String,
    /// Base address of the catalog/job API
    pub pz_addr: String,
    /// Environment variable holding the service credential
    pub auth_en_var: String,
    pub svc_name: String,
    /// Public URL of this service, used for registration
    #[serde(rename = "URL")]
    pub url: String,
    pub port: i64,
    pub description: String,
    pub attributes: Option<BTreeMap<String, String>>,

    /// Directory that holds the per-request workspaces
    pub work_root: PathBuf,
    pub poll_interval_ms: u64,
    pub poll_initial_delay_ms: u64,
    pub poll_max_attempts: u32,
    /// Upper bound on concurrent downloads (and uploads) within one request
    pub transfer_concurrency: usize,
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cli_cmd: String::new(),
            version_cmd: String::new(),
            version_str: String::new(),
            pz_addr: String::new(),
            auth_en_var: String::new(),
            svc_name: String::new(),
            url: String::new(),
            port: 0,
            description: String::new(),
            attributes: None,
            work_root: PathBuf::from("."),
            poll_interval_ms: 200,
            poll_initial_delay_ms: 200,
            poll_max_attempts: 100,
            transfer_concurrency: 1,
            request_timeout_secs: 600,
        }
    }
}

/// What the loaded configuration permits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub can_register: bool,
    pub can_file: bool,
    pub has_auth: bool,
}

impl ServiceConfig {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json(&content)?;
        info!("Loaded service config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Listen port, falling back to 8080 for missing or out-of-range values
    pub fn effective_port(&self) -> u16 {
        u16::try_from(self.port)
            .ok()
            .filter(|p| *p > 0)
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_initial_delay(&self) -> Duration {
        Duration::from_millis(self.poll_initial_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Work out which features this configuration enables, warning about
    /// anything blank, contradictory or meaningless.
    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities {
            can_register: true,
            can_file: true,
            has_auth: true,
        };

        if self.cli_cmd.is_empty() {
            warn!("Config: CliCmd is blank. This is a major security vulnerability.");
        }

        if self.pz_addr.is_empty() {
            warn!("Config: PzAddr not specified. Autoregistration and file upload/download disabled.");
            caps = Capabilities {
                can_register: false,
                can_file: false,
                has_auth: false,
            };
        } else if self.auth_en_var.is_empty() {
            warn!("Config: AuthEnVar was not specified. Client will have to provide authKey. Autoregistration disabled.");
            caps.has_auth = false;
            caps.can_register = false;
        } else if self.svc_name.is_empty() {
            warn!("Config: SvcName not specified. Autoregistration disabled.");
            caps.can_register = false;
        } else if self.url.is_empty() {
            warn!("Config: URL not specified for this service. Autoregistration disabled.");
            caps.can_register = false;
        }

        if !caps.can_file {
            for (key, value) in [
                ("VersionCmd", &self.version_cmd),
                ("VersionStr", &self.version_str),
                ("AuthEnVar", &self.auth_en_var),
            ] {
                if !value.is_empty() {
                    warn!("Config: {} was specified, but is meaningless without upload/download/autoregistration.", key);
                }
            }
        } else if self.version_cmd.is_empty() && self.version_str.is_empty() {
            warn!("Config: neither VersionCmd nor VersionStr was specified. Version will be left blank.");
        } else if !self.version_cmd.is_empty() && !self.version_str.is_empty() {
            warn!("Config: Both VersionCmd and VersionStr were specified. Redundant. Default to VersionCmd.");
        }

        if !caps.can_register {
            if !self.svc_name.is_empty() && !caps.can_file {
                warn!("Config: SvcName was specified, but is meaningless without autoregistration.");
            }
            if !self.url.is_empty() {
                warn!("Config: URL was specified, but is meaningless without autoregistration.");
            }
        } else if self.description.is_empty() {
            warn!("Config: Description not specified. When autoregistering, descriptions are strongly encouraged.");
        }

        if self.port <= 0 {
            warn!("Config: Port not specified, or incorrect format. Default to {}.", DEFAULT_PORT);
        }

        caps
    }

    /// Read the service credential from the configured environment variable.
    ///
    /// An empty or missing value turns off `has_auth` and `can_register`;
    /// callers then have to supply `authKey` themselves.
    pub fn load_credential(&self, caps: &mut Capabilities) -> Option<String> {
        self.credential_from(caps, |name| std::env::var(name).ok())
    }

    fn credential_from<F>(&self, caps: &mut Capabilities, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if !caps.has_auth {
            return None;
        }
        match lookup(&self.auth_en_var).filter(|v| !v.is_empty()) {
            Some(key) => Some(key),
            None => {
                warn!(
                    "No auth key at {}. Registration disabled, and client will have to provide authKey.",
                    self.auth_en_var
                );
                caps.has_auth = false;
                caps.can_register = false;
                None
            }
        }
    }
}
