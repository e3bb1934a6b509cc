//! Per-run job context supplied by the CI host.

use crate::build_id::{BuildIdentifier, ChangeRequest};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Values the CI host assigns to a single job run.
///
/// Built once at run start and passed by reference to every stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobContext {
    /// Branch under build.
    pub branch: String,

    /// Change request, if this run was triggered in change-request context.
    pub change_request: Option<ChangeRequest>,

    /// Host-assigned run counter.
    pub build_id: String,

    /// Job name; may contain `/` for multibranch jobs.
    pub job_name: String,

    /// Private workspace directory of this run.
    pub workspace: PathBuf,
}

impl JobContext {
    pub fn new(
        branch: impl Into<String>,
        change_request: Option<ChangeRequest>,
        build_id: impl Into<String>,
        job_name: impl Into<String>,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        Self {
            branch: branch.into(),
            change_request,
            build_id: build_id.into(),
            job_name: job_name.into(),
            workspace: workspace.into(),
        }
    }

    pub fn is_change_request(&self) -> bool {
        self.change_request.is_some()
    }

    pub fn build_identifier(&self) -> Option<BuildIdentifier> {
        self.change_request.map(|cr| cr.build_identifier())
    }

    /// Name of this run's test container: `<build id>-<job name>` with
    /// slashes replaced, so concurrent runs on one host never collide.
    pub fn container_name(&self) -> String {
        format!("{}-{}", self.build_id, self.job_name.replace('/', "-"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_replaces_slashes() {
        let ctx = JobContext::new("PR-7", Some(ChangeRequest::new(7)), "12", "salt/PR-7", "/ws");
        assert_eq!(ctx.container_name(), "12-salt-PR-7");
    }

    #[test]
    fn test_container_names_differ_across_runs() {
        let a = JobContext::new("PR-7", None, "12", "salt/PR-7", "/ws");
        let b = JobContext::new("PR-7", None, "13", "salt/PR-7", "/ws");
        let c = JobContext::new("PR-8", None, "12", "salt/PR-8", "/ws");
        assert_ne!(a.container_name(), b.container_name());
        assert_ne!(a.container_name(), c.container_name());
    }

    #[test]
    fn test_build_identifier_only_in_change_request_context() {
        let pr = JobContext::new("feature-y", Some(ChangeRequest::new(7)), "1", "job", "/ws");
        assert_eq!(pr.build_identifier().unwrap().as_str(), "07");
        assert!(pr.is_change_request());

        let branch = JobContext::new("feature-y", None, "1", "job", "/ws");
        assert!(branch.build_identifier().is_none());
        assert!(!branch.is_change_request());
    }
}
