//! Command execution backends.

use crate::command::{CommandOutput, CommandSpec};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs a [`CommandSpec`] to completion.
///
/// A non-zero exit is reported through [`CommandOutput::exit_code`], not as
/// an error; errors mean the command could not be run at all.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &CommandSpec) -> Result<CommandOutput>;
}

/// Executes commands as child processes.
///
/// Children are killed when their future is dropped, so cancelling a run
/// never leaves a step running behind the controller's back.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    /// Timeout per command in seconds (0 = none).
    pub timeout_secs: u64,

    /// Send child output straight to the console instead of capturing it.
    pub stream_output: bool,
}

impl ShellExecutor {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout_secs,
            stream_output: false,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream_output = true;
        self
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, command: &CommandSpec) -> Result<CommandOutput> {
        let start = Instant::now();

        let mut cmd = Command::new(&command.program);
        cmd.args(command.exposed_args()).kill_on_drop(true);
        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir);
        }
        if self.stream_output {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        cmd.stdin(if command.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|source| PipelineError::Spawn {
            command: command.to_string(),
            source,
        })?;

        if let (Some(secret), Some(mut stdin)) = (&command.stdin, child.stdin.take()) {
            stdin.write_all(secret.expose().as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = if self.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(self.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| PipelineError::Timeout {
                command: command.to_string(),
                secs: self.timeout_secs,
            })??
        } else {
            child.wait_with_output().await?
        };

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        debug!(
            command = %command,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            "Command finished"
        );
        Ok(result)
    }
}

/// Logs commands instead of running them; every command succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunExecutor;

#[async_trait]
impl CommandExecutor for DryRunExecutor {
    async fn execute(&self, command: &CommandSpec) -> Result<CommandOutput> {
        info!(command = %command, "Dry run");
        Ok(CommandOutput::default())
    }
}
