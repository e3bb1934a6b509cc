//! In-memory command executor for tests.
//!
//! [`RecordingExecutor`] records every command it is asked to run and
//! answers with success unless a rule matches the rendered command.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::command::{CommandOutput, CommandSpec};
use crate::error::{PipelineError, Result};
use crate::runner::CommandExecutor;

#[derive(Debug, Clone)]
enum Behaviour {
    Exit(i32),
    SpawnError,
    Hang,
}

/// Records commands; fails, errors or hangs on matching prefixes.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    rules: Vec<(String, Behaviour)>,
    executed: Mutex<Vec<CommandSpec>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with `code` for commands whose rendering starts with `prefix`.
    pub fn fail_on(mut self, prefix: &str, code: i32) -> Self {
        self.rules.push((prefix.to_string(), Behaviour::Exit(code)));
        self
    }

    /// Report a spawn error for matching commands.
    pub fn error_on(mut self, prefix: &str) -> Self {
        self.rules.push((prefix.to_string(), Behaviour::SpawnError));
        self
    }

    /// Never complete matching commands.
    pub fn hang_on(mut self, prefix: &str) -> Self {
        self.rules.push((prefix.to_string(), Behaviour::Hang));
        self
    }

    /// Rendered (redacted) commands, in execution order.
    pub fn commands(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Commands exactly as they were handed over, secrets included.
    pub fn specs(&self) -> Vec<CommandSpec> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, command: &CommandSpec) -> Result<CommandOutput> {
        self.executed.lock().unwrap().push(command.clone());

        let rendered = command.to_string();
        let behaviour = self
            .rules
            .iter()
            .find(|(prefix, _)| rendered.starts_with(prefix.as_str()))
            .map(|(_, b)| b.clone());

        match behaviour {
            None => Ok(CommandOutput::default()),
            Some(Behaviour::Exit(code)) => Ok(CommandOutput {
                exit_code: code,
                stderr: format!("{rendered}: failed"),
                ..CommandOutput::default()
            }),
            Some(Behaviour::SpawnError) => Err(PipelineError::Spawn {
                command: rendered,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            }),
            Some(Behaviour::Hang) => std::future::pending().await,
        }
    }
}
