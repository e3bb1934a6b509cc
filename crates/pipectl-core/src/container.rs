//! Container runtime command builders.
//!
//! Commands target the `docker` CLI by default; any CLI with the same
//! `login`/`pull`/`run`/`exec`/`stop` surface (e.g. `podman`) works.

use crate::command::CommandSpec;
use crate::credentials::RegistryLogin;
use std::path::Path;

/// Keeps a detached container alive until it is stopped.
const KEEPALIVE: &str = "cat";

/// Container runtime CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRuntime {
    program: String,
}

impl Default for ContainerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl ContainerRuntime {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Log in to `registry`, passing the password on stdin.
    pub fn login(&self, registry: &str, login: &RegistryLogin) -> CommandSpec {
        CommandSpec::new(&self.program)
            .args(["login", "-u", login.username.as_str(), "--password-stdin", registry])
            .stdin_secret(login.password.clone())
    }

    pub fn pull(&self, image: &str) -> CommandSpec {
        CommandSpec::new(&self.program).args(["pull", image])
    }

    /// Start `image` detached as `name`, with `workspace` mounted read-only
    /// at the same path and used as the working directory.
    ///
    /// `--rm` makes the later `stop` also remove the container.
    pub fn run_detached(&self, name: &str, image: &str, workspace: &Path) -> CommandSpec {
        let ws = workspace.to_string_lossy();
        CommandSpec::new(&self.program).args([
            "run".to_string(),
            "-d".to_string(),
            "-t".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
            "-v".to_string(),
            format!("{ws}:{ws}:ro"),
            "-w".to_string(),
            ws.to_string(),
            image.to_string(),
            KEEPALIVE.to_string(),
        ])
    }

    pub fn exec<I, S>(&self, name: &str, command: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(&self.program)
            .args(["exec", name])
            .args(command.into_iter().map(|part| -> String { part.into() }))
    }

    pub fn stop(&self, name: &str) -> CommandSpec {
        CommandSpec::new(&self.program).args(["stop", name])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Secret;

    #[test]
    fn test_login_uses_stdin_for_password() {
        let login = RegistryLogin {
            username: "ci".to_string(),
            password: Secret::new("pw"),
        };
        let cmd = ContainerRuntime::default().login("registry:5000", &login);
        assert_eq!(cmd.to_string(), "docker login -u ci --password-stdin registry:5000");
        assert!(!cmd.exposed_args().contains(&"pw"));
        assert_eq!(cmd.stdin.as_ref().map(|s| s.expose()), Some("pw"));
    }

    #[test]
    fn test_run_detached_mounts_workspace_read_only() {
        let cmd = ContainerRuntime::default().run_detached(
            "12-job",
            "registry/img:1",
            Path::new("/var/ws/job"),
        );
        assert_eq!(
            cmd.to_string(),
            "docker run -d -t --rm --name 12-job -v /var/ws/job:/var/ws/job:ro -w /var/ws/job registry/img:1 cat"
        );
    }

    #[test]
    fn test_exec_and_stop() {
        let rt = ContainerRuntime::new("podman");
        assert_eq!(
            rt.exec("c1", ["pip", "install", "-r", "req.txt"]).to_string(),
            "podman exec c1 pip install -r req.txt"
        );
        assert_eq!(rt.stop("c1").to_string(), "podman stop c1");
        assert_eq!(rt.pull("img:1").to_string(), "podman pull img:1");
    }
}
