//! Version discovery
//!
//! Run once at startup. The result goes into ingest metadata, the service
//! registration and `/version`.

use pzsvc_core::{split_tokens, ServiceConfig};
use tokio::process::Command;
use tracing::{info, warn};

/// `VersionCmd` output when configured, `VersionStr` otherwise.
///
/// A failing `VersionCmd` is logged and yields whatever it printed, which
/// is usually nothing.
pub async fn discover_version(config: &ServiceConfig) -> String {
    let argv = split_tokens(&config.version_cmd);
    let Some((program, args)) = argv.split_first() else {
        return config.version_str.clone();
    };

    let version = match Command::new(program).args(args).output().await {
        Ok(output) => {
            if !output.status.success() {
                warn!(command = %config.version_cmd, status = %output.status, "VersionCmd failed");
            }
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        Err(e) => {
            warn!(command = %config.version_cmd, error = %e, "VersionCmd could not be launched");
            String::new()
        }
    };
    info!(version = %version, "Discovered service version");
    version
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(version_cmd: &str, version_str: &str) -> ServiceConfig {
        ServiceConfig {
            version_cmd: version_cmd.into(),
            version_str: version_str.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_version_string_when_no_command() {
        assert_eq!(discover_version(&config("", "1.4.0")).await, "1.4.0");
        assert_eq!(discover_version(&config("   ", "")).await, "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_version_command_wins() {
        assert_eq!(discover_version(&config("echo 2.0.1", "1.4.0")).await, "2.0.1");
    }

    #[tokio::test]
    async fn test_unlaunchable_command_gives_empty_version() {
        let version = discover_version(&config("no-such-version-tool-9c1e --version", "1.4.0")).await;
        assert_eq!(version, "");
    }
}
