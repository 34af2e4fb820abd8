//! pzsvc-runner: the per-request execution pipeline
//!
//! ```text
//! Orchestrator::execute(request)
//!     ├── validate (command, file capability, credential)
//!     ├── WorkspaceManager::acquire   → <work_root>/<uuid>/
//!     ├── ArtifactStore::download     × inFiles
//!     ├── CommandExecutor::run        (cwd = workspace)
//!     ├── ArtifactStore::upload       × outTiffs / outTxts / outGeoJson
//!     └── Workspace::release          (also on drop)
//! ```

pub mod command;
pub mod orchestrator;
pub mod workspace;

pub use command::{CommandExecutor, CommandOutput};
pub use orchestrator::{ExecSettings, Orchestrator};
pub use workspace::{Workspace, WorkspaceManager};
