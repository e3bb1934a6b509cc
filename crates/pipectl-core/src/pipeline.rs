//! Pipeline orchestration: gates, fail-fast stage execution, cleanup.

use crate::cleanup::{CleanupAction, CleanupOutcome, CleanupStack};
use crate::command::CommandSpec;
use crate::config::PipelineConfig;
use crate::container::ContainerRuntime;
use crate::context::JobContext;
use crate::credentials::{CredentialNeeds, Credentials};
use crate::error::{PipelineError, Result};
use crate::gate::GateVerdict;
use crate::retention::RetentionPolicy;
use crate::runner::CommandExecutor;
use crate::stage::{StageKind, Step, StepKind};
use crate::trigger::{resolve_trigger, Schedule, TriggerEvent};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every eligible stage and every cleanup action succeeded.
    Succeeded,
    /// A stage failed; later stages did not run.
    Failed,
    /// The run was cancelled from outside.
    Aborted,
    /// A cleanup action failed.
    CleanupFailed,
    /// The trigger event does not start a run on this branch.
    Skipped,
}

impl RunStatus {
    /// Whether the host should mark the run green.
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Skipped)
    }
}

/// State of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Running,
    Passed,
    Failed,
    Aborted,
}

/// Result of one executed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub kind: StepKind,
    pub command: CommandSpec,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Result of one executed stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub status: StageStatus,
    pub steps: Vec<StepResult>,
    /// Stage-scoped cleanup (container stop).
    pub cleanup: Vec<CleanupOutcome>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StageResult {
    pub fn passed(&self) -> bool {
        self.status == StageStatus::Passed
    }
}

/// A stage whose gate was closed.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedStage {
    pub stage: StageKind,
    pub reason: String,
}

/// Result of a complete run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub run_id: String,
    pub trigger: TriggerEvent,
    pub status: RunStatus,
    pub stages: Vec<StageResult>,
    pub skipped: Vec<SkippedStage>,
    /// Run-scoped cleanup still pending at the end (workspace, plus any
    /// stage cleanup interrupted by cancellation).
    pub cleanup: Vec<CleanupOutcome>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl PipelineResult {
    /// Number of stages that passed.
    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.passed()).count()
    }

    /// Number of stages that did not pass.
    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|s| !s.passed()).count()
    }

    /// Every command that ran, in order, redacted.
    pub fn commands(&self) -> Vec<String> {
        self.stages
            .iter()
            .flat_map(|s| s.steps.iter().map(|step| step.command.to_string()))
            .collect()
    }
}

/// A stage together with its gate verdict and, when eligible, its steps.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedStage {
    pub stage: StageKind,
    pub title: &'static str,
    pub verdict: GateVerdict,
    pub commands: Vec<CommandSpec>,
}

/// Everything a run on this context would do.
#[derive(Debug, Clone, Serialize)]
pub struct PipelinePlan {
    pub branch: String,
    pub build_identifier: Option<String>,
    pub container_name: String,
    pub schedule: String,
    pub retention: RetentionPolicy,
    pub stages: Vec<PlannedStage>,
}

#[derive(Default)]
struct RunState {
    stages: Mutex<Vec<StageResult>>,
    skipped: Mutex<Vec<SkippedStage>>,
    stage_started: Mutex<Option<Instant>>,
}

impl RunState {
    fn start_stage(&self, stage: StageKind) {
        *self
            .stage_started
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        self.stages.lock().unwrap_or_else(|e| e.into_inner()).push(StageResult {
            stage,
            status: StageStatus::Running,
            steps: Vec::new(),
            cleanup: Vec::new(),
            error: None,
            duration_ms: 0,
        });
    }

    fn with_current<F: FnOnce(&mut StageResult)>(&self, f: F) {
        let mut stages = self.stages.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = stages.last_mut() {
            f(current);
        }
    }

    /// Mark the running stage aborted, timed up to now.
    fn abort_current(&self) {
        let started = *self.stage_started.lock().unwrap_or_else(|e| e.into_inner());
        self.with_current(|s| {
            if s.status == StageStatus::Running {
                s.status = StageStatus::Aborted;
                if let Some(started) = started {
                    s.duration_ms = started.elapsed().as_millis() as u64;
                }
            }
        });
    }

    fn skip(&self, stage: StageKind, reason: String) {
        self.skipped
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SkippedStage { stage, reason });
    }
}

/// Why the stage loop stopped early.
enum Halt {
    Stage(PipelineError),
    Cleanup(String),
}

/// Pipeline controller.
pub struct Pipeline {
    config: PipelineConfig,
    executor: Arc<dyn CommandExecutor>,
    runtime: ContainerRuntime,
    delete_workspace: bool,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            config,
            executor,
            runtime: ContainerRuntime::default(),
            delete_workspace: true,
        }
    }

    pub fn with_runtime(mut self, runtime: ContainerRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    /// Leave the workspace in place after the run.
    pub fn keep_workspace(mut self) -> Self {
        self.delete_workspace = false;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stages whose gates are open for `ctx`, in execution order.
    pub fn eligible_stages(&self, ctx: &JobContext) -> Vec<StageKind> {
        StageKind::ALL
            .into_iter()
            .filter(|s| s.gate().evaluate(ctx, &self.config).eligible)
            .collect()
    }

    /// Credentials needed by the eligible stages.
    pub fn credential_needs(&self, ctx: &JobContext) -> CredentialNeeds {
        self.eligible_stages(ctx)
            .iter()
            .fold(CredentialNeeds::default(), |acc, s| {
                let needs = s.credential_needs();
                CredentialNeeds {
                    registry: acc.registry || needs.registry,
                    index_token: acc.index_token || needs.index_token,
                }
            })
    }

    /// Describe a run without executing anything.
    ///
    /// Planning uses `credentials` only to render commands; secrets are
    /// redacted in the result.
    pub fn plan(&self, ctx: &JobContext, credentials: &Credentials) -> Result<PipelinePlan> {
        let mut stages = Vec::new();
        for stage in StageKind::ALL {
            let verdict = stage.gate().evaluate(ctx, &self.config);
            let commands = if verdict.eligible {
                stage
                    .plan(ctx, &self.config, credentials, &self.runtime)?
                    .into_iter()
                    .map(|step| step.command)
                    .collect()
            } else {
                Vec::new()
            };
            stages.push(PlannedStage {
                stage,
                title: stage.title(),
                verdict,
                commands,
            });
        }

        let release = self.config.release_branch.as_str();
        Ok(PipelinePlan {
            branch: ctx.branch.clone(),
            build_identifier: ctx.build_identifier().map(|id| id.to_string()),
            container_name: ctx.container_name(),
            schedule: Schedule::for_branch(&ctx.branch, release)
                .expression()
                .to_string(),
            retention: RetentionPolicy::for_branch(&ctx.branch, release),
            stages,
        })
    }

    /// Run to completion.
    pub async fn run<L>(&self, ctx: &JobContext, trigger: TriggerEvent, lookup: L) -> PipelineResult
    where
        L: Fn(&str) -> Option<String>,
    {
        self.run_until(ctx, trigger, lookup, std::future::pending())
            .await
    }

    /// Run until done or until `cancel` resolves.
    ///
    /// `lookup` resolves credential variables. Whatever happens, every
    /// registered cleanup action (container stop, workspace removal) has
    /// run by the time this returns.
    pub async fn run_until<L, C>(
        &self,
        ctx: &JobContext,
        trigger: TriggerEvent,
        lookup: L,
        cancel: C,
    ) -> PipelineResult
    where
        L: Fn(&str) -> Option<String>,
        C: Future<Output = ()>,
    {
        let start = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let cleanup = CleanupStack::new();
        let state = RunState::default();

        info!(
            run_id = %run_id,
            branch = %ctx.branch,
            trigger = trigger.name(),
            "Starting pipeline"
        );

        if self.delete_workspace {
            cleanup.push(CleanupAction::RemoveWorkspace {
                path: ctx.workspace.clone(),
            });
        }

        let (mut status, error) =
            if !resolve_trigger(&trigger, &ctx.branch, &self.config.release_branch) {
                info!(run_id = %run_id, "Trigger does not apply to this branch, skipping");
                (RunStatus::Skipped, None)
            } else {
                let body = self.execute_stages(ctx, &lookup, &cleanup, &state);
                tokio::select! {
                    halt = body => match halt {
                        None => (RunStatus::Succeeded, None),
                        Some(Halt::Stage(e)) => (RunStatus::Failed, Some(e.to_string())),
                        Some(Halt::Cleanup(e)) => (RunStatus::CleanupFailed, Some(e)),
                    },
                    _ = cancel => {
                        warn!(run_id = %run_id, "Pipeline cancelled");
                        state.abort_current();
                        (RunStatus::Aborted, Some("cancelled".to_string()))
                    }
                }
            };

        let outcomes = cleanup.drain(self.executor.as_ref()).await;
        if status == RunStatus::Succeeded && outcomes.iter().any(|o| !o.success) {
            status = RunStatus::CleanupFailed;
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        match status {
            RunStatus::Succeeded => info!(run_id = %run_id, duration_ms, "Pipeline succeeded"),
            RunStatus::Skipped => info!(run_id = %run_id, "Pipeline skipped"),
            _ => error!(
                run_id = %run_id,
                status = ?status,
                error = error.as_deref().unwrap_or(""),
                "Pipeline did not succeed"
            ),
        }

        PipelineResult {
            run_id,
            trigger,
            status,
            stages: state.stages.into_inner().unwrap_or_else(|e| e.into_inner()),
            skipped: state.skipped.into_inner().unwrap_or_else(|e| e.into_inner()),
            cleanup: outcomes,
            error,
            duration_ms,
        }
    }

    async fn execute_stages<L>(
        &self,
        ctx: &JobContext,
        lookup: &L,
        cleanup: &CleanupStack,
        state: &RunState,
    ) -> Option<Halt>
    where
        L: Fn(&str) -> Option<String>,
    {
        let credentials =
            match Credentials::resolve(&self.config, self.credential_needs(ctx), lookup) {
                Ok(c) => c,
                Err(e) => return Some(Halt::Stage(e)),
            };

        for stage in StageKind::ALL {
            let verdict = stage.gate().evaluate(ctx, &self.config);
            if !verdict.eligible {
                info!(stage = %stage, reason = %verdict.reason, "Skipping stage");
                state.skip(stage, verdict.reason);
                continue;
            }

            info!(stage = %stage, "Executing stage");
            state.start_stage(stage);
            let stage_start = Instant::now();

            let halt = match stage.plan(ctx, &self.config, &credentials, &self.runtime) {
                Ok(steps) => self.execute_stage(stage, steps, cleanup, state).await,
                Err(e) => Some(Halt::Stage(e)),
            };

            let duration_ms = stage_start.elapsed().as_millis() as u64;
            state.with_current(|s| {
                s.duration_ms = duration_ms;
                match &halt {
                    None => s.status = StageStatus::Passed,
                    Some(Halt::Stage(e)) => {
                        s.status = StageStatus::Failed;
                        s.error = Some(e.to_string());
                    }
                    Some(Halt::Cleanup(e)) => {
                        s.status = StageStatus::Failed;
                        s.error = Some(e.clone());
                    }
                }
            });

            if let Some(halt) = halt {
                error!(stage = %stage, "Stage failed, aborting remaining stages");
                return Some(halt);
            }
            info!(stage = %stage, duration_ms, "Stage passed");
        }
        None
    }

    /// Run a stage's steps in order, then release whatever they acquired.
    async fn execute_stage(
        &self,
        stage: StageKind,
        steps: Vec<Step>,
        cleanup: &CleanupStack,
        state: &RunState,
    ) -> Option<Halt> {
        let mut acquired = Vec::new();
        let mut failure = None;

        for step in steps {
            if let Some(action) = step.cleanup.clone() {
                acquired.push(cleanup.push(action));
            }

            info!(stage = %stage, command = %step.command, "Running step");
            match self.executor.execute(&step.command).await {
                Ok(output) => {
                    let passed = output.success();
                    state.with_current(|s| {
                        s.steps.push(StepResult {
                            kind: step.kind,
                            command: step.command.clone(),
                            exit_code: output.exit_code,
                            stdout: output.stdout,
                            stderr: output.stderr,
                            duration_ms: output.duration_ms,
                        })
                    });
                    if !passed {
                        failure = Some(step.kind.failure(stage, &step.command, output.exit_code));
                        break;
                    }
                }
                Err(e) => {
                    state.with_current(|s| {
                        s.steps.push(StepResult {
                            kind: step.kind,
                            command: step.command.clone(),
                            exit_code: -1,
                            stdout: String::new(),
                            stderr: e.to_string(),
                            duration_ms: 0,
                        })
                    });
                    failure = Some(e);
                    break;
                }
            }
        }

        let mut cleanup_error = None;
        for handle in acquired.into_iter().rev() {
            if let Some(outcome) = cleanup.release(handle, self.executor.as_ref()).await {
                if !outcome.success && cleanup_error.is_none() {
                    cleanup_error = Some(format!(
                        "stage {stage}: {} failed: {}",
                        outcome.action,
                        outcome.error.as_deref().unwrap_or("unknown error")
                    ));
                }
                state.with_current(|s| s.cleanup.push(outcome));
            }
        }

        match (failure, cleanup_error) {
            (Some(e), _) => Some(Halt::Stage(e)),
            (None, Some(e)) => Some(Halt::Cleanup(e)),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_id::ChangeRequest;
    use crate::fakes::RecordingExecutor;
    use std::collections::HashMap;

    fn creds_env() -> HashMap<String, String> {
        [
            ("REGISTRY_CREDENTIALS_USR", "ci"),
            ("REGISTRY_CREDENTIALS_PSW", "pw"),
            ("PACKAGE_INDEX_TOKEN", "tok"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn pipeline(exec: Arc<RecordingExecutor>) -> Pipeline {
        Pipeline::new(PipelineConfig::default(), exec).keep_workspace()
    }

    #[test]
    fn test_run_status_success() {
        assert!(RunStatus::Succeeded.is_success());
        assert!(RunStatus::Skipped.is_success());
        assert!(!RunStatus::Failed.is_success());
        assert!(!RunStatus::Aborted.is_success());
        assert!(!RunStatus::CleanupFailed.is_success());
    }

    #[test]
    fn test_eligible_stages() {
        let p = pipeline(Arc::new(RecordingExecutor::new()));
        let pr = JobContext::new("feature-x", Some(ChangeRequest::new(3)), "1", "job", "/ws");
        assert_eq!(
            p.eligible_stages(&pr),
            vec![StageKind::Build, StageKind::UnitTests, StageKind::DeployStaging]
        );

        let release = JobContext::new("v2018.3.3-ca", None, "1", "job", "/ws");
        assert_eq!(p.eligible_stages(&release), vec![StageKind::DeployRelease]);

        let plain = JobContext::new("feature-x", None, "1", "job", "/ws");
        assert!(p.eligible_stages(&plain).is_empty());
    }

    #[test]
    fn test_credential_needs_follow_eligible_stages() {
        let p = pipeline(Arc::new(RecordingExecutor::new()));
        let pr = JobContext::new("feature-x", Some(ChangeRequest::new(3)), "1", "job", "/ws");
        assert_eq!(
            p.credential_needs(&pr),
            CredentialNeeds {
                registry: true,
                index_token: false
            }
        );
        let release = JobContext::new("v2018.3.3-ca", None, "1", "job", "/ws");
        assert_eq!(
            p.credential_needs(&release),
            CredentialNeeds {
                registry: false,
                index_token: true
            }
        );
    }

    #[tokio::test]
    async fn test_build_failure_aborts_later_stages() {
        let exec = Arc::new(RecordingExecutor::new().fail_on("./build.sh -b 03", 2));
        let ctx = JobContext::new("feature-x", Some(ChangeRequest::new(3)), "1", "job", "/ws");
        let env = creds_env();

        let result = pipeline(exec.clone())
            .run(&ctx, TriggerEvent::ChangeRequest { number: 3 }, |k| env.get(k).cloned())
            .await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.stages.len(), 1);
        assert_eq!(result.failed_count(), 1);
        assert_eq!(exec.commands(), vec!["./build.sh -b 03".to_string()]);
        assert!(result.error.unwrap().contains("code 2"));
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_any_stage() {
        let exec = Arc::new(RecordingExecutor::new());
        let ctx = JobContext::new("v2018.3.3-ca", None, "1", "job", "/ws");

        let result = pipeline(exec.clone())
            .run(&ctx, TriggerEvent::Push, |_| None)
            .await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.stages.is_empty());
        assert!(exec.commands().is_empty());
        assert!(result.error.unwrap().contains("PACKAGE_INDEX_TOKEN"));
    }

    #[tokio::test]
    async fn test_container_stop_failure_marks_cleanup_failed() {
        let exec = Arc::new(RecordingExecutor::new().fail_on("docker stop", 1));
        let ctx = JobContext::new("feature-x", Some(ChangeRequest::new(3)), "1", "job", "/ws");
        let env = creds_env();

        let result = pipeline(exec.clone())
            .run(&ctx, TriggerEvent::ChangeRequest { number: 3 }, |k| env.get(k).cloned())
            .await;

        assert_eq!(result.status, RunStatus::CleanupFailed);
        assert_eq!(result.stages.len(), 2);
        assert!(!result.stages[1].cleanup[0].success);
        assert!(!exec.commands().iter().any(|c| c.contains("-k -s -u")));
    }

    #[tokio::test]
    async fn test_exec_spawn_error_still_stops_container() {
        let exec = Arc::new(RecordingExecutor::new().error_on("docker exec"));
        let ctx = JobContext::new("feature-x", Some(ChangeRequest::new(3)), "1", "job", "/ws");
        let env = creds_env();

        let result = pipeline(exec.clone())
            .run(&ctx, TriggerEvent::ChangeRequest { number: 3 }, |k| env.get(k).cloned())
            .await;

        assert_eq!(result.status, RunStatus::Failed);
        let unit = &result.stages[1];
        assert_eq!(unit.stage, StageKind::UnitTests);
        assert_eq!(unit.status, StageStatus::Failed);
        let last = unit.steps.last().unwrap();
        assert_eq!(last.exit_code, -1);
        assert!(last.stderr.contains("not found"));
        assert!(unit.cleanup[0].success);
        assert_eq!(exec.commands().last().unwrap(), "docker stop 1-job");
        assert!(!exec.commands().iter().any(|c| c.contains("-k -s -u")));
    }

    #[tokio::test]
    async fn test_plan_redacts_token() {
        let p = pipeline(Arc::new(RecordingExecutor::new()));
        let ctx = JobContext::new("v2018.3.3-ca", None, "1", "job", "/ws");
        let creds = Credentials {
            registry: None,
            index_token: Some(crate::credentials::Secret::new("tok")),
        };
        let plan = p.plan(&ctx, &creds).unwrap();
        assert_eq!(plan.schedule, "");
        assert_eq!(plan.retention.keep_builds, 10);
        let json = serde_json::to_string(&plan).unwrap();
        assert!(!json.contains("tok\""));
        assert!(json.contains("****"));
    }
}
