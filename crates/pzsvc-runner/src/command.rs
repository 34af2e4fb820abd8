//! Command Executor
//!
//! Runs the configured program inside a request's workspace. Stdout is
//! captured and handed back to the caller; stderr goes straight to the
//! service's own stderr for operators.

use crate::workspace::Workspace;
use pzsvc_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::{debug, info};

/// What the program printed and how it ended
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub status: ExitStatus,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// The non-zero exit as an error, if there was one
    pub fn failure(&self) -> Option<Error> {
        (!self.status.success()).then(|| Error::process(format!("command failed: {}", self.status)))
    }
}

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    install_dir: PathBuf,
}

impl CommandExecutor {
    /// `install_dir` is the directory the service runs from; workspaces
    /// are created directly beneath it.
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
        }
    }

    /// Point `argv[0]` at the install directory when a file of that name
    /// lives there.
    ///
    /// The program runs with the workspace as its working directory, one
    /// level below the install directory, so such a file is reached as
    /// `../<argv0>`. Anything else is left for the search path.
    pub async fn relocate_program(&self, argv: &mut [String]) {
        let Some(program) = argv.first_mut() else {
            return;
        };
        if Path::new(program.as_str()).is_absolute() {
            return;
        }

        let candidate = self.install_dir.join(program.as_str());
        // An unreadable entry still counts as present.
        let present = tokio::fs::try_exists(&candidate).await.unwrap_or(true);
        if present {
            debug!(program = %program, "Found program in install dir, running it from ../");
            *program = format!("../{}", program);
        }
    }

    /// Run `argv` inside `workspace`.
    ///
    /// Launch failures are errors. A program that starts and exits non-zero
    /// is not: its output is still returned and `CommandOutput::failure`
    /// reports the exit.
    pub async fn run(&self, workspace: &Workspace, argv: &[String]) -> Result<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::client("No cmd or CliCmd. Please provide \"cmd\" param."))?;

        let mut argv = argv.to_vec();
        self.relocate_program(&mut argv).await;
        let resolved = &argv[0];

        info!(
            workspace = %workspace.id(),
            program = %program,
            resolved = %resolved,
            args = ?args,
            "Executing command"
        );

        let output = Command::new(resolved)
            .args(args)
            .current_dir(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::process(format!("failed to launch {}: {}", program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(workspace = %workspace.id(), status = %output.status, stdout = %stdout, "Program output");

        Ok(CommandOutput {
            stdout,
            status: output.status,
        })
    }
}
