//! Trigger resolution: which host events start a run on which branch.

use crate::build_id::ChangeRequest;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Cron expression for the periodic run: once an hour, 04:00 to 05:59 in
/// the host's local time. The host evaluates it; pipectl only records it.
pub const SCHEDULE_CRON: &str = "H 4-5 * * *";

/// Periodic trigger of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// Hourly per [`SCHEDULE_CRON`].
    Hourly,
    /// No periodic runs (the release branch).
    Disabled,
}

impl Schedule {
    pub fn for_branch(branch: &str, release_branch: &str) -> Self {
        if branch == release_branch {
            Schedule::Disabled
        } else {
            Schedule::Hourly
        }
    }

    /// Host cron expression; empty when disabled.
    pub fn expression(&self) -> &'static str {
        match self {
            Schedule::Hourly => SCHEDULE_CRON,
            Schedule::Disabled => "",
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Schedule::Hourly)
    }
}

/// Host event that may start a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerEvent {
    /// Periodic timer, stamped with the host's local time and offset.
    Timer { at: DateTime<FixedOffset> },
    /// Change request opened or updated.
    ChangeRequest { number: u64 },
    /// Commit landed on the branch.
    Push,
    /// Operator started the job by hand.
    Manual,
}

impl TriggerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TriggerEvent::Timer { .. } => "timer",
            TriggerEvent::ChangeRequest { .. } => "change_request",
            TriggerEvent::Push => "push",
            TriggerEvent::Manual => "manual",
        }
    }

    pub fn change_request(&self) -> Option<ChangeRequest> {
        match self {
            TriggerEvent::ChangeRequest { number } => Some(ChangeRequest::new(*number)),
            _ => None,
        }
    }
}

/// Decide whether `event` starts a run on `branch`.
///
/// Change requests start a run on any branch. A timer starts one whenever
/// the branch has a schedule at all: the host already matched the cron
/// expression, and a queued run may start after the window closed. Push and
/// manual events are always accepted.
pub fn resolve_trigger(event: &TriggerEvent, branch: &str, release_branch: &str) -> bool {
    match event {
        TriggerEvent::Timer { .. } => Schedule::for_branch(branch, release_branch).is_enabled(),
        TriggerEvent::ChangeRequest { .. } | TriggerEvent::Push | TriggerEvent::Manual => true,
    }
}
