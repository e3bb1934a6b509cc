//! Scoped cleanup: release actions that run on every exit path.
//!
//! Acquisitions push an action onto a [`CleanupStack`]. The owner releases
//! it at the end of its scope; anything still registered when the run ends
//! (a stage cut short by cancellation, the workspace) is drained in LIFO
//! order by the pipeline.

use crate::command::CommandSpec;
use crate::runner::CommandExecutor;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, warn};

/// A release action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupAction {
    /// Stop (and, with `--rm`, remove) a named container.
    StopContainer { name: String, command: CommandSpec },
    /// Recursively delete the job workspace.
    RemoveWorkspace { path: PathBuf },
}

impl CleanupAction {
    pub fn describe(&self) -> String {
        match self {
            CleanupAction::StopContainer { name, .. } => format!("stop container {name}"),
            CleanupAction::RemoveWorkspace { path } => {
                format!("remove workspace {}", path.display())
            }
        }
    }

    /// Run the action. Never fails; problems are reported in the outcome.
    pub async fn run(&self, executor: &dyn CommandExecutor) -> CleanupOutcome {
        let result = match self {
            CleanupAction::StopContainer { command, .. } => match executor.execute(command).await
            {
                Ok(output) if output.success() => Ok(()),
                Ok(output) => Err(format!("`{command}` exited with code {}", output.exit_code)),
                Err(e) => Err(e.to_string()),
            },
            CleanupAction::RemoveWorkspace { path } => match tokio::fs::remove_dir_all(path).await
            {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.to_string()),
            },
        };

        let action = self.describe();
        match result {
            Ok(()) => {
                info!(action = %action, "Cleanup done");
                CleanupOutcome {
                    action,
                    success: true,
                    error: None,
                }
            }
            Err(error) => {
                warn!(action = %action, error = %error, "Cleanup failed");
                CleanupOutcome {
                    action,
                    success: false,
                    error: Some(error),
                }
            }
        }
    }
}

/// Result of one cleanup action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupOutcome {
    pub action: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Registration returned by [`CleanupStack::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupHandle(u64);

#[derive(Debug, Default)]
struct Entries {
    next_id: u64,
    actions: Vec<(u64, CleanupAction)>,
}

/// Pending release actions of one run.
#[derive(Debug, Default)]
pub struct CleanupStack {
    entries: Mutex<Entries>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, action: CleanupAction) -> CleanupHandle {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let id = entries.next_id;
        entries.next_id += 1;
        entries.actions.push((id, action));
        CleanupHandle(id)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .actions
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregister and run one action. Returns `None` if it already ran.
    pub async fn release(
        &self,
        handle: CleanupHandle,
        executor: &dyn CommandExecutor,
    ) -> Option<CleanupOutcome> {
        let action = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let pos = entries.actions.iter().position(|(id, _)| *id == handle.0)?;
            entries.actions.remove(pos).1
        };
        Some(action.run(executor).await)
    }

    /// Run every remaining action, most recent first.
    pub async fn drain(&self, executor: &dyn CommandExecutor) -> Vec<CleanupOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let next = {
                let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
                entries.actions.pop()
            };
            match next {
                Some((_, action)) => outcomes.push(action.run(executor).await),
                None => break,
            }
        }
        outcomes
    }
}
