//! Invocations of the project build script.
//!
//! The script is opaque; only its flag surface is modelled:
//!
//! | flag | meaning |
//! |---|---|
//! | `-b <id>` | build with this version tag |
//! | `-k` | keep build artifacts |
//! | `-s` | skip the build, reuse existing artifacts |
//! | `-u` | upload to the package index |
//! | `-p` | target the production (release) index |
//! | `-t <token>` | index token |

use crate::command::CommandSpec;
use crate::credentials::Secret;
use std::path::Path;

/// One call of the build script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildScriptInvocation {
    pub build_tag: Option<String>,
    pub keep: bool,
    pub skip: bool,
    pub upload: bool,
    pub production: bool,
    pub token: Option<Secret>,
}

impl BuildScriptInvocation {
    /// `-b <id>`: build only.
    pub fn build(tag: impl Into<String>) -> Self {
        Self {
            build_tag: Some(tag.into()),
            ..Self::default()
        }
    }

    /// `-b <tag> -k -s -u`: upload the latest dev build under the bare
    /// change number, overwriting the previous one.
    pub fn dev_publish_latest(tag: impl Into<String>) -> Self {
        Self {
            build_tag: Some(tag.into()),
            keep: true,
            skip: true,
            upload: true,
            ..Self::default()
        }
    }

    /// `-b <tag> -k -u`: build and upload a dev build pinned to change and
    /// build number. Deliberately without `-s` so the build actually runs.
    pub fn dev_publish_pinned(tag: impl Into<String>) -> Self {
        Self {
            build_tag: Some(tag.into()),
            keep: true,
            upload: true,
            ..Self::default()
        }
    }

    /// `-u -p -t <token>`: publish to the release index.
    pub fn release_publish(token: Secret) -> Self {
        Self {
            upload: true,
            production: true,
            token: Some(token),
            ..Self::default()
        }
    }

    /// Command for `script`, run from `workspace`.
    pub fn to_command(&self, script: &Path, workspace: &Path) -> CommandSpec {
        let mut cmd = CommandSpec::new(script.to_string_lossy()).current_dir(workspace);
        if let Some(tag) = &self.build_tag {
            cmd = cmd.arg("-b").arg(tag.as_str());
        }
        if self.keep {
            cmd = cmd.arg("-k");
        }
        if self.skip {
            cmd = cmd.arg("-s");
        }
        if self.upload {
            cmd = cmd.arg("-u");
        }
        if self.production {
            cmd = cmd.arg("-p");
        }
        if let Some(token) = &self.token {
            cmd = cmd.arg("-t").secret_arg(token.clone());
        }
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(inv: &BuildScriptInvocation) -> String {
        inv.to_command(Path::new("./build.sh"), Path::new("/ws"))
            .to_string()
    }

    #[test]
    fn test_build_only() {
        assert_eq!(render(&BuildScriptInvocation::build("07")), "./build.sh -b 07");
    }

    #[test]
    fn test_dev_publish_flag_sets_differ_by_skip() {
        let latest = BuildScriptInvocation::dev_publish_latest("7");
        let pinned = BuildScriptInvocation::dev_publish_pinned("7.07");
        assert_eq!(render(&latest), "./build.sh -b 7 -k -s -u");
        assert_eq!(render(&pinned), "./build.sh -b 7.07 -k -u");
        assert!(latest.skip);
        assert!(!pinned.skip);
    }

    #[test]
    fn test_release_publish_redacts_token() {
        let inv = BuildScriptInvocation::release_publish(Secret::new("tok"));
        let cmd = inv.to_command(Path::new("./build.sh"), Path::new("/ws"));
        assert_eq!(cmd.to_string(), "./build.sh -u -p -t ****");
        assert_eq!(cmd.exposed_args(), vec!["-u", "-p", "-t", "tok"]);
        assert_eq!(cmd.cwd.as_deref(), Some(Path::new("/ws")));
    }
}
