//! Execution Orchestrator
//!
//! Drives one execute request from validation to cleanup and folds every
//! failure into the request's `ExecutionResult`. Only the early client-side
//! checks stop the pipeline; a failed download, command or upload is
//! recorded and the remaining steps still run.

use crate::command::CommandExecutor;
use crate::workspace::{Workspace, WorkspaceManager};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use pzsvc_catalog::{ArtifactStore, IngestMetadata};
use pzsvc_core::{Error, ExecutionRequest, ExecutionResult, FileRecord, OutputKind};
use std::sync::Arc;
use tracing::{info, warn};

/// Per-service settings the pipeline needs on every request
#[derive(Debug, Clone, Default)]
pub struct ExecSettings {
    /// Configured base command (`CliCmd`)
    pub base_command: String,
    pub service_name: String,
    pub version: String,
    /// Service credential, used when a request brings none
    pub credential: Option<String>,
    /// Maximum transfers in flight per list; 1 keeps them sequential
    pub transfer_concurrency: usize,
}

#[derive(Clone)]
pub struct Orchestrator {
    settings: Arc<ExecSettings>,
    workspaces: WorkspaceManager,
    executor: CommandExecutor,
    /// `None` when file transfer is disabled by configuration
    store: Option<Arc<dyn ArtifactStore>>,
}

impl Orchestrator {
    pub fn new(
        settings: ExecSettings,
        workspaces: WorkspaceManager,
        executor: CommandExecutor,
        store: Option<Arc<dyn ArtifactStore>>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            workspaces,
            executor,
            store,
        }
    }

    /// Run the whole pipeline for one request.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let mut result = ExecutionResult::new();

        let plan = match self.validate(request) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "Rejected execute request");
                result.record(&e);
                return result;
            }
        };

        let workspace = match self.workspaces.acquire().await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(error = %e, "Could not allocate workspace");
                result.record(&e);
                return result;
            }
        };
        info!(workspace = %workspace.id(), argv = ?plan.argv, "Starting execution");

        if let Some(store) = &plan.store {
            let (files, errors) = self
                .download_all(store.as_ref(), &workspace, &request.in_files, &plan.credential)
                .await;
            result.in_files = files;
            for e in errors {
                result.record(&e);
            }
        }

        match self.executor.run(&workspace, &plan.argv).await {
            Ok(output) => {
                if let Some(e) = output.failure() {
                    result.record(&e);
                }
                result.prog_return = output.stdout;
            }
            Err(e) => result.record(&e),
        }

        if let Some(store) = &plan.store {
            let metadata = IngestMetadata::for_run(
                &self.settings.service_name,
                &self.settings.version,
                &self.settings.base_command,
                &request.cmd,
                Utc::now(),
            );
            for (kind, files) in request.outputs() {
                let (uploaded, errors) = self
                    .upload_all(store.as_ref(), &workspace, kind, files, &metadata, &plan.credential)
                    .await;
                result.out_files.extend(uploaded);
                for e in errors {
                    result.record(&e);
                }
            }
        }

        info!(
            workspace = %workspace.id(),
            inputs = result.in_files.len(),
            outputs = result.out_files.len(),
            errors = result.errors.len(),
            "Execution finished"
        );
        workspace.release().await;
        result
    }

    /// Checks that must pass before any filesystem or network side effect.
    fn validate(&self, request: &ExecutionRequest) -> Result<Plan, Error> {
        let (credential, store) = if request.has_file_operations() {
            let store = self.store.clone().ok_or_else(|| {
                Error::forbidden("Cannot complete. File up/download not enabled in config file.")
            })?;
            let credential = request
                .auth_key
                .clone()
                .or_else(|| self.settings.credential.clone())
                .filter(|k| !k.is_empty())
                .ok_or_else(|| Error::forbidden("Cannot complete. Auth Key not available."))?;
            (credential, Some(store))
        } else {
            (String::new(), None)
        };

        let argv = request.argv(&self.settings.base_command);
        if argv.is_empty() {
            return Err(Error::client("No cmd or CliCmd. Please provide \"cmd\" param."));
        }

        Ok(Plan {
            argv,
            credential,
            store,
        })
    }

    async fn download_all(
        &self,
        store: &dyn ArtifactStore,
        workspace: &Workspace,
        data_ids: &[String],
        credential: &str,
    ) -> (FileRecord, Vec<Error>) {
        let outcomes = stream::iter(data_ids.iter().cloned())
            .map(|data_id| async move {
                let outcome = store.download(&data_id, workspace.path(), credential).await;
                (data_id, outcome)
            })
            .buffered(self.concurrency())
            .collect::<Vec<_>>()
            .await;

        let mut files = FileRecord::new();
        let mut errors = Vec::new();
        for (data_id, outcome) in outcomes {
            match outcome {
                Ok(file_name) => {
                    files.insert(data_id, file_name);
                }
                Err(e) => {
                    warn!(data_id = %data_id, error = %e, "Download failed");
                    errors.push(Error::from(e));
                }
            }
        }
        (files, errors)
    }

    async fn upload_all(
        &self,
        store: &dyn ArtifactStore,
        workspace: &Workspace,
        kind: OutputKind,
        file_names: &[String],
        metadata: &IngestMetadata,
        credential: &str,
    ) -> (FileRecord, Vec<Error>) {
        let outcomes = stream::iter(file_names.iter().cloned())
            .map(|file_name| async move {
                let outcome = store
                    .upload(&file_name, workspace.path(), kind, metadata, credential)
                    .await;
                (file_name, outcome)
            })
            .buffered(self.concurrency())
            .collect::<Vec<_>>()
            .await;

        let mut files = FileRecord::new();
        let mut errors = Vec::new();
        for (file_name, outcome) in outcomes {
            match outcome {
                Ok(data_id) => {
                    files.insert(file_name, data_id);
                }
                Err(e) => {
                    warn!(file = %file_name, kind = %kind, error = %e, "Upload failed");
                    errors.push(Error::from(e));
                }
            }
        }
        (files, errors)
    }

    fn concurrency(&self) -> usize {
        self.settings.transfer_concurrency.max(1)
    }
}

/// A request that passed validation
struct Plan {
    argv: Vec<String>,
    credential: String,
    store: Option<Arc<dyn ArtifactStore>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pzsvc_catalog::CatalogError;
    use pzsvc_core::ErrorKind;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    /// Serves inputs from memory and accepts uploads of files that exist.
    #[derive(Default)]
    struct MemoryStore {
        inputs: HashMap<String, (String, Vec<u8>)>,
        uploaded: Mutex<Vec<(String, OutputKind, Vec<u8>, String)>>,
        calls: Mutex<u32>,
    }

    impl MemoryStore {
        fn with_input(mut self, id: &str, name: &str, bytes: &[u8]) -> Self {
            self.inputs.insert(id.into(), (name.into(), bytes.to_vec()));
            self
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ArtifactStore for MemoryStore {
        async fn download(
            &self,
            data_id: &str,
            dir: &Path,
            _credential: &str,
        ) -> pzsvc_catalog::Result<String> {
            *self.calls.lock().unwrap() += 1;
            let (name, bytes) = self.inputs.get(data_id).ok_or_else(|| CatalogError::Status {
                status: 404,
                url: format!("memory://file/{}", data_id),
                body: "no such artifact".into(),
            })?;
            std::fs::write(dir.join(name), bytes)?;
            Ok(name.clone())
        }

        async fn upload(
            &self,
            file_name: &str,
            dir: &Path,
            kind: OutputKind,
            metadata: &IngestMetadata,
            credential: &str,
        ) -> pzsvc_catalog::Result<String> {
            *self.calls.lock().unwrap() += 1;
            let bytes = std::fs::read(dir.join(file_name))?;
            let mut uploaded = self.uploaded.lock().unwrap();
            assert_eq!(metadata.attributes["algoName"], "algo");
            uploaded.push((file_name.into(), kind, bytes, credential.into()));
            Ok(format!("data-{}", uploaded.len()))
        }
    }

    fn settings(base: &str) -> ExecSettings {
        ExecSettings {
            base_command: base.into(),
            service_name: "algo".into(),
            version: "1.0".into(),
            credential: Some("service-key".into()),
            transfer_concurrency: 1,
        }
    }

    fn orchestrator(
        root: &Path,
        settings: ExecSettings,
        store: Option<Arc<MemoryStore>>,
    ) -> Orchestrator {
        Orchestrator::new(
            settings,
            WorkspaceManager::new(root),
            CommandExecutor::new(root),
            store.map(|s| s as Arc<dyn ArtifactStore>),
        )
    }

    /// Workspaces still on disk under `root`
    fn leftover_dirs(root: &Path) -> usize {
        std::fs::read_dir(root)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().is_dir())
            .count()
    }

    /// Install an executable shell script next to the workspaces.
    #[cfg(unix)]
    fn script(root: &Path, name: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = root.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_plain_command_without_files() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(root.path(), settings("echo"), Some(store.clone()));

        let request = ExecutionRequest::from_form("hello world", "", "", "", "", "");
        let result = orch.execute(&request).await;

        assert!(result.is_success(), "{:?}", result.errors);
        assert_eq!(result.prog_return, "hello world\n");
        assert_eq!(store.calls(), 0);
        assert_eq!(leftover_dirs(root.path()), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_one_failed_download_does_not_stop_the_others() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(
            MemoryStore::default()
                .with_input("d1", "a.txt", b"A")
                .with_input("d3", "c.txt", b"C"),
        );
        let orch = orchestrator(root.path(), settings("ls"), Some(store));

        let request = ExecutionRequest::from_form("", "d1,d2,d3", "", "", "", "");
        let result = orch.execute(&request).await;

        assert_eq!(result.in_files.len(), 2);
        assert_eq!(result.in_files["d1"], "a.txt");
        assert_eq!(result.in_files["d3"], "c.txt");
        assert!(!result.in_files.contains_key("d2"));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("d2"));
        assert_eq!(result.failure_kind(), Some(ErrorKind::Transfer));
        assert_eq!(result.prog_return, "a.txt\nc.txt\n");
        assert_eq!(leftover_dirs(root.path()), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_outputs_uploaded_per_kind() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        script(root.path(), "produce.sh", "printf abc > out.txt; printf II > out.tif");
        let orch = orchestrator(root.path(), settings("produce.sh"), Some(store.clone()));

        let request = ExecutionRequest {
            out_tiffs: vec!["out.tif".into()],
            out_txts: vec!["out.txt".into(), "missing.txt".into()],
            auth_key: Some("caller-key".into()),
            ..Default::default()
        };
        let result = orch.execute(&request).await;

        assert_eq!(result.out_files["out.tif"], "data-1");
        assert_eq!(result.out_files["out.txt"], "data-2");
        assert!(!result.out_files.contains_key("missing.txt"));
        assert_eq!(result.errors.len(), 1);

        let uploaded = store.uploaded.lock().unwrap();
        assert_eq!(uploaded[0].1, OutputKind::Raster);
        assert_eq!(
            uploaded[1],
            ("out.txt".to_string(), OutputKind::Text, b"abc".to_vec(), "caller-key".to_string())
        );
        assert_eq!(leftover_dirs(root.path()), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_still_uploads() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        script(root.path(), "partial.sh", "echo partial > out.txt; exit 2");
        let orch = orchestrator(root.path(), settings("partial.sh"), Some(store.clone()));

        let request = ExecutionRequest {
            out_txts: vec!["out.txt".into()],
            ..Default::default()
        };
        let result = orch.execute(&request).await;

        assert_eq!(result.failure_kind(), Some(ErrorKind::Process));
        assert_eq!(result.out_files["out.txt"], "data-1");
        // the service credential stands in when the caller brings none
        assert_eq!(store.uploaded.lock().unwrap()[0].3, "service-key");
        assert_eq!(leftover_dirs(root.path()), 0);
    }

    #[tokio::test]
    async fn test_workspace_failure_stops_with_one_internal_error() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default().with_input("d1", "a.txt", b"A"));
        let orch = orchestrator(&root.path().join("missing"), settings("ls"), Some(store.clone()));

        let request = ExecutionRequest::from_form("", "d1", "", "", "", "");
        let result = orch.execute(&request).await;

        assert_eq!(result.failure_kind(), Some(ErrorKind::Internal));
        assert_eq!(result.errors.len(), 1);
        assert!(result.in_files.is_empty());
        assert_eq!(result.prog_return, "");
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_command_rejected_before_side_effects() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default().with_input("d1", "a.txt", b"A"));
        let orch = orchestrator(root.path(), settings(""), Some(store.clone()));

        let request = ExecutionRequest::from_form("", "d1", "", "", "", "");
        let result = orch.execute(&request).await;

        assert_eq!(result.failure_kind(), Some(ErrorKind::Client));
        assert_eq!(store.calls(), 0);
        assert_eq!(leftover_dirs(root.path()), 0);
    }

    #[tokio::test]
    async fn test_files_without_capability_are_forbidden() {
        let root = tempfile::tempdir().unwrap();
        let orch = orchestrator(root.path(), settings("ls"), None);

        let request = ExecutionRequest::from_form("", "d1", "", "", "", "");
        let result = orch.execute(&request).await;

        assert_eq!(result.failure_kind(), Some(ErrorKind::Forbidden));
        assert!(result.errors[0].contains("not enabled"));
        assert_eq!(leftover_dirs(root.path()), 0);
    }

    #[tokio::test]
    async fn test_files_without_credential_are_forbidden() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let mut no_key = settings("ls");
        no_key.credential = None;
        let orch = orchestrator(root.path(), no_key, Some(store.clone()));

        let request = ExecutionRequest::from_form("", "", "", "out.txt", "", "");
        let result = orch.execute(&request).await;

        assert_eq!(result.failure_kind(), Some(ErrorKind::Forbidden));
        assert!(result.errors[0].contains("Auth Key"));
        assert_eq!(store.calls(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_parallel_transfers_keep_every_error() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(
            MemoryStore::default()
                .with_input("d1", "a.txt", b"A")
                .with_input("d2", "b.txt", b"B"),
        );
        let mut parallel = settings("true");
        parallel.transfer_concurrency = 4;
        let orch = orchestrator(root.path(), parallel, Some(store));

        let request = ExecutionRequest::from_form("", "x1,d1,x2,d2,x3", "", "", "", "");
        let result = orch.execute(&request).await;

        assert_eq!(result.in_files.len(), 2);
        assert_eq!(result.errors.len(), 3);
        assert!(result.errors[0].contains("x1"));
        assert!(result.errors[2].contains("x3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_concurrent_requests_clean_up() {
        let root = tempfile::tempdir().unwrap();
        script(root.path(), "whereami.sh", "basename \"$PWD\"; echo \"$1\"");
        let orch = orchestrator(root.path(), settings("whereami.sh"), None);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let orch = orch.clone();
                tokio::spawn(async move {
                    let request = ExecutionRequest::from_form(&i.to_string(), "", "", "", "", "");
                    orch.execute(&request).await
                })
            })
            .collect();

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            let result = handle.await.unwrap();
            assert!(result.is_success(), "{:?}", result.errors);
            let dir = result.prog_return.lines().next().unwrap().to_string();
            assert!(seen.insert(dir));
        }
        assert_eq!(leftover_dirs(root.path()), 0);
    }
}
