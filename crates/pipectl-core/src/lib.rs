//! pipectl core - change-request pipeline controller
//!
//! Provides a pipeline controller that:
//! - Resolves which host events start a run (change requests, hourly timer)
//! - Gates four stages (build, unit tests, staging and release publish)
//! - Runs unit tests inside a pinned container against the job workspace
//! - Guarantees container stop and workspace removal on every exit path

pub mod build_id;
pub mod build_script;
pub mod cleanup;
pub mod command;
pub mod config;
pub mod container;
pub mod context;
pub mod credentials;
pub mod error;
pub mod fakes;
pub mod gate;
pub mod pipeline;
pub mod retention;
pub mod runner;
pub mod stage;
pub mod telemetry;
pub mod trigger;

// Re-export key types
pub use build_id::{BuildIdentifier, ChangeRequest};
pub use build_script::BuildScriptInvocation;
pub use cleanup::{CleanupAction, CleanupOutcome, CleanupStack};
pub use command::{Arg, CommandOutput, CommandSpec};
pub use config::PipelineConfig;
pub use container::ContainerRuntime;
pub use context::JobContext;
pub use credentials::{CredentialNeeds, Credentials, RegistryLogin, Secret};
pub use error::{PipelineError, Result};
pub use gate::{GateVerdict, StageGate};
pub use pipeline::{
    Pipeline, PipelinePlan, PipelineResult, PlannedStage, RunStatus, SkippedStage, StageResult,
    StageStatus, StepResult,
};
pub use retention::RetentionPolicy;
pub use runner::{CommandExecutor, DryRunExecutor, ShellExecutor};
pub use stage::{StageKind, Step, StepKind};
pub use telemetry::init_tracing;
pub use trigger::{resolve_trigger, Schedule, TriggerEvent, SCHEDULE_CRON};

/// pipectl version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
