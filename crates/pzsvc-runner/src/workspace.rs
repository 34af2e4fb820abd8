//! Workspace Manager
//!
//! Each request gets a private scratch directory named by a fresh v4 UUID
//! under the configured root. The directory is removed when the request
//! releases it, and again on drop if the release never happened, so early
//! returns, cancelled futures and panics all clean up.

use pzsvc_core::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create `<root>/<uuid>` with permissions open to the service and to
    /// any child it spawns.
    pub async fn acquire(&self) -> Result<Workspace> {
        let id = Uuid::new_v4().hyphenated().to_string();
        let path = self.root.join(&id);

        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| Error::workspace(format!("cannot create {}: {}", path.display(), e)))?;

        // From here on the guard owns the directory.
        let workspace = Workspace {
            id,
            path,
            released: false,
        };
        open_permissions(&workspace.path).await?;

        debug!(workspace = %workspace.id, "Workspace acquired");
        Ok(workspace)
    }
}

#[cfg(unix)]
async fn open_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))
        .await
        .map_err(|e| Error::workspace(format!("cannot chmod {}: {}", path.display(), e)))
}

#[cfg(not(unix))]
async fn open_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// A request's scratch directory. Removed on `release` or drop.
#[derive(Debug)]
pub struct Workspace {
    id: String,
    path: PathBuf,
    released: bool,
}

impl Workspace {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the directory tree. Failures are logged and swallowed.
    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            warn!(workspace = %self.id, error = %e, "Failed to remove workspace");
        } else {
            debug!(workspace = %self.id, "Workspace released");
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(workspace = %self.id, error = %e, "Failed to remove workspace on drop");
            }
        }
    }
}
