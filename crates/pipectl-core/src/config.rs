//! Static pipeline configuration.
//!
//! Everything that is fixed per project rather than per run: the release
//! branch, the build script, the pinned test image and the names of the
//! credential variables. Loaded from JSON; every field has a default.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Long-lived branch that publishes to the release index and is never
    /// scheduled.
    pub release_branch: String,

    /// Build script, relative to the workspace.
    pub build_script: PathBuf,

    /// Container registry host.
    pub registry: String,

    /// Test image repository within the registry.
    pub image: String,

    /// Pinned image tag.
    pub image_tag: String,

    /// Requirements file installed inside the test container.
    pub requirements_file: String,

    /// Directory the test runner is restricted to.
    pub test_root: String,

    /// Parallel test workers.
    pub test_parallelism: u32,

    /// Variable holding the release index token.
    pub index_token_var: String,

    /// Variable holding the registry username.
    pub registry_user_var: String,

    /// Variable holding the registry password.
    pub registry_password_var: String,

    /// Per-command timeout in seconds (0 = no timeout).
    pub step_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            release_branch: "v2018.3.3-ca".to_string(),
            build_script: PathBuf::from("./build.sh"),
            registry: "registry.ci.internal:5000".to_string(),
            image: "salt-ci/py3-unit".to_string(),
            image_tag: "2018.3.3-1".to_string(),
            requirements_file: "requirements/dev_python34.txt".to_string(),
            test_root: "tests/unit".to_string(),
            test_parallelism: 30,
            index_token_var: "PACKAGE_INDEX_TOKEN".to_string(),
            registry_user_var: "REGISTRY_CREDENTIALS_USR".to_string(),
            registry_password_var: "REGISTRY_CREDENTIALS_PSW".to_string(),
            step_timeout_secs: 0,
        }
    }
}

impl PipelineConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a working pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.release_branch.trim().is_empty() {
            return Err(PipelineError::Config("release_branch must not be empty".into()));
        }
        if self.build_script.as_os_str().is_empty() {
            return Err(PipelineError::Config("build_script must not be empty".into()));
        }
        if self.image.is_empty() || self.image_tag.is_empty() {
            return Err(PipelineError::Config(
                "image and image_tag must both be set".into(),
            ));
        }
        if self.test_parallelism == 0 {
            return Err(PipelineError::Config(
                "test_parallelism must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Fully qualified, pinned image reference.
    pub fn image_ref(&self) -> String {
        if self.registry.is_empty() {
            format!("{}:{}", self.image, self.image_tag)
        } else {
            format!("{}/{}:{}", self.registry, self.image, self.image_tag)
        }
    }

    pub fn is_release_branch(&self, branch: &str) -> bool {
        branch == self.release_branch
    }
}
