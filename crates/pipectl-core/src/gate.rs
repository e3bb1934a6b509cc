//! Stage gate evaluation.

use crate::config::PipelineConfig;
use crate::context::JobContext;
use serde::{Deserialize, Serialize};

/// Condition under which a stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageGate {
    /// The run has a change-request context.
    ChangeRequest,
    /// The run builds the release branch.
    ReleaseBranch,
}

/// Gate evaluation verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether the stage is eligible.
    pub eligible: bool,

    /// Why, in one line.
    pub reason: String,
}

impl StageGate {
    /// Evaluate the gate against one run.
    ///
    /// Gates are independent of one another and of earlier stage results;
    /// fail-fast is the pipeline's concern, not the gate's.
    pub fn evaluate(&self, ctx: &JobContext, config: &PipelineConfig) -> GateVerdict {
        match self {
            StageGate::ChangeRequest => match ctx.change_request {
                Some(cr) => GateVerdict {
                    eligible: true,
                    reason: format!("change request {cr}"),
                },
                None => GateVerdict {
                    eligible: false,
                    reason: "no change request".to_string(),
                },
            },
            StageGate::ReleaseBranch => {
                if config.is_release_branch(&ctx.branch) {
                    GateVerdict {
                        eligible: true,
                        reason: format!("branch {} is the release branch", ctx.branch),
                    }
                } else {
                    GateVerdict {
                        eligible: false,
                        reason: format!("branch {} is not {}", ctx.branch, config.release_branch),
                    }
                }
            }
        }
    }
}
