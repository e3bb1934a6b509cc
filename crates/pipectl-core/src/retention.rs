//! Build-record retention, consumed by the CI host.

use serde::{Deserialize, Serialize};

const RELEASE_KEEP: u32 = 10;
const DEFAULT_KEEP: u32 = 5;

/// How many build records the host keeps for a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub keep_builds: u32,
}

impl RetentionPolicy {
    pub fn for_branch(branch: &str, release_branch: &str) -> Self {
        let keep_builds = if branch == release_branch {
            RELEASE_KEEP
        } else {
            DEFAULT_KEEP
        };
        Self { keep_builds }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_branch_keeps_ten() {
        assert_eq!(
            RetentionPolicy::for_branch("v2018.3.3-ca", "v2018.3.3-ca").keep_builds,
            10
        );
    }

    #[test]
    fn test_other_branches_keep_five() {
        assert_eq!(RetentionPolicy::for_branch("feature-x", "v2018.3.3-ca").keep_builds, 5);
        assert_eq!(RetentionPolicy::for_branch("PR-7", "v2018.3.3-ca").keep_builds, 5);
    }
}
