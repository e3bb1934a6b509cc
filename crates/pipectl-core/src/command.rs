//! External command descriptions.
//!
//! Every interaction with a collaborator (build script, container runtime)
//! is a [`CommandSpec`]. Secret arguments and stdin are kept as [`Secret`]
//! so that rendering a command for logs never leaks them.

use crate::credentials::Secret;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// A single command-line argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Plain(String),
    Secret(Secret),
}

impl Arg {
    /// Value to hand to the child process.
    pub fn expose(&self) -> &str {
        match self {
            Arg::Plain(s) => s,
            Arg::Secret(s) => s.expose(),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Plain(s) => f.write_str(s),
            Arg::Secret(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Plain(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Plain(s)
    }
}

/// Command to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable.
    pub program: String,

    /// Arguments, in order.
    pub args: Vec<Arg>,

    /// Working directory (inherits the controller's when unset).
    pub cwd: Option<PathBuf>,

    /// Secret written to the child's stdin, then closed.
    pub stdin: Option<Secret>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn secret_arg(mut self, secret: Secret) -> Self {
        self.args.push(Arg::Secret(secret));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin_secret(mut self, secret: Secret) -> Self {
        self.stdin = Some(secret);
        self
    }

    /// Arguments as they are passed to the process.
    pub fn exposed_args(&self) -> Vec<&str> {
        self.args.iter().map(Arg::expose).collect()
    }

    /// Redacted argv, suitable for logs and reports.
    pub fn display_argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(ToString::to_string))
            .collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_argv().join(" "))
    }
}

impl Serialize for CommandSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.display_argv().serialize(serializer)
    }
}

/// Result of running a command to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout (empty when output is streamed).
    pub stdout: String,

    /// Captured stderr (empty when output is streamed).
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_redacts_secret_args() {
        let cmd = CommandSpec::new("./build.sh")
            .args(["-u", "-p", "-t"])
            .secret_arg(Secret::new("s3cr3t"));

        assert_eq!(cmd.to_string(), "./build.sh -u -p -t ****");
        assert_eq!(cmd.exposed_args(), vec!["-u", "-p", "-t", "s3cr3t"]);
        assert!(!format!("{cmd:?}").contains("s3cr3t"));
    }

    #[test]
    fn test_serialize_uses_redacted_argv() {
        let cmd = CommandSpec::new("docker")
            .args(["login", "-u", "ci", "--password-stdin", "registry"])
            .stdin_secret(Secret::new("pw"));
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(
            json,
            r#"["docker","login","-u","ci","--password-stdin","registry"]"#
        );
    }

    #[test]
    fn test_output_success() {
        let ok = CommandOutput::default();
        assert!(ok.success());
        let failed = CommandOutput {
            exit_code: 1,
            ..CommandOutput::default()
        };
        assert!(!failed.success());
    }
}
