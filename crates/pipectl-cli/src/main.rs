//! pipectl - change-request pipeline controller CLI
//!
//! ## Commands
//!
//! - `run`: Run every eligible stage for the current job, then clean up
//! - `plan`: Show gate verdicts and the commands each stage would run
//! - `build-id`: Print the build identifier for a change number
//! - `schedule`: Print the cron expression for a branch
//! - `retention`: Print how many build records a branch keeps

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use pipectl_core::{
    BuildIdentifier, ChangeRequest, CommandExecutor, Credentials, DryRunExecutor, JobContext,
    Pipeline, PipelineConfig, PipelineResult, RegistryLogin, RetentionPolicy, Schedule, Secret,
    ShellExecutor, TriggerEvent,
};

#[derive(Parser)]
#[command(name = "pipectl")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Change-request pipeline controller", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and results
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for the current job
    Run {
        #[command(flatten)]
        job: JobArgs,

        /// Pipeline config file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Event that started this run (default: change-request when CHANGE_ID is set, else push)
        #[arg(short, long, value_enum)]
        trigger: Option<TriggerKind>,

        /// Log commands instead of running them (never deletes the workspace)
        #[arg(long)]
        dry_run: bool,

        /// Do not delete the workspace when the run ends
        #[arg(long)]
        keep_workspace: bool,

        /// Container runtime CLI
        #[arg(long, default_value = "docker")]
        runtime: String,
    },

    /// Show what a run would do, without running anything
    Plan {
        #[command(flatten)]
        job: JobArgs,

        /// Pipeline config file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the build identifier for a change number
    BuildId {
        /// Change-request number
        number: u64,
    },

    /// Print the cron expression for a branch (empty when disabled)
    Schedule {
        /// Branch name
        #[arg(short, long, env = "BRANCH_NAME")]
        branch: String,

        /// Pipeline config file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print how many build records the host keeps for a branch
    Retention {
        /// Branch name
        #[arg(short, long, env = "BRANCH_NAME")]
        branch: String,

        /// Pipeline config file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Job context, defaulting to the CI host's environment.
#[derive(Args)]
struct JobArgs {
    /// Branch under build
    #[arg(long, env = "BRANCH_NAME")]
    branch: String,

    /// Change-request number
    #[arg(long, env = "CHANGE_ID")]
    change_id: Option<u64>,

    /// Host-assigned run counter
    #[arg(long, env = "BUILD_ID")]
    build_id: String,

    /// Job name
    #[arg(long, env = "JOB_NAME")]
    job_name: String,

    /// Job workspace directory, deleted when the run ends
    #[arg(long, env = "WORKSPACE")]
    workspace: PathBuf,
}

impl JobArgs {
    fn into_context(self) -> Result<JobContext> {
        let workspace = if self.workspace.is_absolute() {
            self.workspace
        } else {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(&self.workspace)
        };
        Ok(JobContext::new(
            self.branch,
            self.change_id.map(ChangeRequest::new),
            self.build_id,
            self.job_name,
            workspace,
        ))
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TriggerKind {
    ChangeRequest,
    Timer,
    Push,
    Manual,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    pipectl_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            job,
            config,
            trigger,
            dry_run,
            keep_workspace,
            runtime,
        } => {
            let ctx = job.into_context()?;
            let config = load_config(config.as_deref())?;
            let shutdown = shutdown_signal().context("Failed to install signal handlers")?;
            let opts = RunOptions {
                trigger,
                dry_run,
                keep_workspace,
                runtime,
                json: cli.json,
            };
            let ok = cmd_run(ctx, config, opts, shutdown).await?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Plan { job, config } => {
            let ctx = job.into_context()?;
            let config = load_config(config.as_deref())?;
            cmd_plan(&ctx, config, cli.json)
        }
        Commands::BuildId { number } => {
            println!("{}", BuildIdentifier::from_change_number(number));
            Ok(())
        }
        Commands::Schedule { branch, config } => {
            let config = load_config(config.as_deref())?;
            let schedule = Schedule::for_branch(&branch, &config.release_branch);
            println!("{}", schedule.expression());
            Ok(())
        }
        Commands::Retention { branch, config } => {
            let config = load_config(config.as_deref())?;
            let policy = RetentionPolicy::for_branch(&branch, &config.release_branch);
            println!("{}", policy.keep_builds);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::load(p)
            .with_context(|| format!("Failed to load pipeline config: {:?}", p)),
        None => Ok(PipelineConfig::default()),
    }
}

fn trigger_event(kind: Option<TriggerKind>, ctx: &JobContext) -> Result<TriggerEvent> {
    let kind = kind.unwrap_or(if ctx.is_change_request() {
        TriggerKind::ChangeRequest
    } else {
        TriggerKind::Push
    });
    Ok(match kind {
        TriggerKind::ChangeRequest => {
            let cr = ctx
                .change_request
                .context("--trigger change-request requires CHANGE_ID")?;
            TriggerEvent::ChangeRequest { number: cr.number }
        }
        TriggerKind::Timer => TriggerEvent::Timer {
            at: Local::now().fixed_offset(),
        },
        TriggerKind::Push => TriggerEvent::Push,
        TriggerKind::Manual => TriggerEvent::Manual,
    })
}

/// Resolves on SIGINT or SIGTERM.
///
/// Handlers are installed before this returns, so a signal that arrives
/// while the run is starting up is not lost.
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Received SIGINT, cancelling run"),
            _ = terminate.recv() => info!("Received SIGTERM, cancelling run"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    Ok(async {
        // A failed handler must not read as a cancellation.
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    })
}

/// Flags of `pipectl run`.
struct RunOptions {
    trigger: Option<TriggerKind>,
    dry_run: bool,
    keep_workspace: bool,
    runtime: String,
    json: bool,
}

/// Run the pipeline until done or `shutdown` resolves; returns whether the
/// run counts as green.
async fn cmd_run(
    ctx: JobContext,
    config: PipelineConfig,
    opts: RunOptions,
    shutdown: impl Future<Output = ()>,
) -> Result<bool> {
    let RunOptions {
        trigger,
        dry_run,
        keep_workspace,
        runtime,
        json,
    } = opts;
    let event = trigger_event(trigger, &ctx)?;

    let executor: Arc<dyn CommandExecutor> = if dry_run {
        Arc::new(DryRunExecutor)
    } else {
        Arc::new(ShellExecutor::new(config.step_timeout_secs).streaming())
    };

    let mut pipeline = Pipeline::new(config, executor)
        .with_runtime(pipectl_core::ContainerRuntime::new(runtime));
    if dry_run || keep_workspace {
        pipeline = pipeline.keep_workspace();
    }

    info!(
        branch = %ctx.branch,
        build_id = %ctx.build_id,
        dry_run,
        "Running pipeline"
    );

    let result = pipeline
        .run_until(
            &ctx,
            event,
            |name| {
                std::env::var(name)
                    .ok()
                    .or_else(|| dry_run.then(|| format!("<{name}>")))
            },
            shutdown,
        )
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }

    Ok(result.status.is_success())
}

fn print_summary(result: &PipelineResult) {
    println!("Run {} ({:?})", result.run_id, result.status);
    for stage in &result.stages {
        println!(
            "  {:<16} {:?} ({} ms)",
            stage.stage.name(),
            stage.status,
            stage.duration_ms
        );
        if let Some(err) = &stage.error {
            println!("    error: {}", err);
        }
    }
    for skipped in &result.skipped {
        println!("  {:<16} skipped: {}", skipped.stage.name(), skipped.reason);
    }
    for outcome in &result.cleanup {
        let mark = if outcome.success { "ok" } else { "FAILED" };
        println!("  cleanup: {} [{}]", outcome.action, mark);
    }
    println!(
        "Stages: {} passed, {} failed; {} ms",
        result.passed_count(),
        result.failed_count(),
        result.duration_ms
    );
}

/// Placeholder credentials so a plan can render commands without secrets.
fn placeholder_credentials() -> Credentials {
    Credentials {
        registry: Some(RegistryLogin {
            username: "<registry-user>".to_string(),
            password: Secret::new(String::new()),
        }),
        index_token: Some(Secret::new(String::new())),
    }
}

fn cmd_plan(ctx: &JobContext, config: PipelineConfig, json: bool) -> Result<()> {
    let pipeline = Pipeline::new(config, Arc::new(DryRunExecutor));
    let plan = pipeline
        .plan(ctx, &placeholder_credentials())
        .context("Failed to plan pipeline")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Branch:          {}", plan.branch);
    if let Some(id) = &plan.build_identifier {
        println!("Build id:        {}", id);
    }
    println!("Container:       {}", plan.container_name);
    let schedule = if plan.schedule.is_empty() {
        "(disabled)"
    } else {
        plan.schedule.as_str()
    };
    println!("Schedule:        {}", schedule);
    println!("Keep builds:     {}", plan.retention.keep_builds);
    println!();
    for stage in &plan.stages {
        let mark = if stage.verdict.eligible { "run " } else { "skip" };
        println!("[{}] {} ({})", mark, stage.title, stage.verdict.reason);
        for cmd in &stage.commands {
            println!("       $ {}", cmd);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pipectl_core::fakes::RecordingExecutor;
    use pipectl_core::{RunStatus, StageStatus};
    use std::time::Duration;

    fn dry_run_options() -> RunOptions {
        RunOptions {
            trigger: Some(TriggerKind::Manual),
            dry_run: true,
            keep_workspace: false,
            runtime: "docker".to_string(),
            json: true,
        }
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_explicit_job() {
        let cli = Cli::try_parse_from([
            "pipectl",
            "run",
            "--branch",
            "feature-y",
            "--change-id",
            "7",
            "--build-id",
            "41",
            "--job-name",
            "salt/PR-7",
            "--workspace",
            "/tmp/ws",
            "--dry-run",
        ])
        .expect("parse failed");

        match cli.command {
            Commands::Run { job, dry_run, .. } => {
                assert!(dry_run);
                let ctx = job.into_context().unwrap();
                assert_eq!(ctx.build_identifier().unwrap().as_str(), "07");
                assert_eq!(ctx.container_name(), "41-salt-PR-7");
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_default_trigger_follows_change_request() {
        let pr = JobContext::new("b", Some(ChangeRequest::new(5)), "1", "j", "/ws");
        assert!(matches!(
            trigger_event(None, &pr).unwrap(),
            TriggerEvent::ChangeRequest { number: 5 }
        ));

        let branch = JobContext::new("b", None, "1", "j", "/ws");
        assert!(matches!(trigger_event(None, &branch).unwrap(), TriggerEvent::Push));
        assert!(trigger_event(Some(TriggerKind::ChangeRequest), &branch).is_err());
    }

    #[tokio::test]
    async fn test_dry_run_keeps_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = JobContext::new("feature-y", Some(ChangeRequest::new(7)), "1", "job", dir.path());
        let config = PipelineConfig::default();

        let ok = cmd_run(ctx, config, dry_run_options(), std::future::pending())
            .await
            .expect("dry run failed");
        assert!(ok);
        assert!(dir.path().exists());
    }

    #[test]
    fn test_workspace_has_no_default() {
        let cmd = Cli::command();
        for name in ["run", "plan"] {
            let sub = cmd.find_subcommand(name).expect("subcommand");
            let workspace = sub
                .get_arguments()
                .find(|a| a.get_id() == "workspace")
                .expect("workspace arg");
            assert!(workspace.is_required_set(), "{name} --workspace must be required");
            assert!(workspace.get_default_values().is_empty());
            assert_eq!(workspace.get_env().and_then(|e| e.to_str()), Some("WORKSPACE"));
        }
    }

    #[test]
    fn test_timer_trigger_carries_local_offset() {
        let ctx = JobContext::new("feature-x", None, "1", "job", "/ws");
        match trigger_event(Some(TriggerKind::Timer), &ctx).unwrap() {
            TriggerEvent::Timer { at } => {
                assert_eq!(at.offset(), Local::now().fixed_offset().offset());
            }
            other => panic!("expected timer, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_cancels_run_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let ws = root.path().join("ws");
        std::fs::create_dir_all(&ws).unwrap();
        let exec = Arc::new(RecordingExecutor::new().hang_on("docker exec 3-job python"));
        let ctx = JobContext::new("feature-x", Some(ChangeRequest::new(11)), "3", "job", &ws);

        let shutdown = shutdown_signal().expect("install handlers");
        tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            std::process::Command::new("kill")
                .args(["-TERM", &std::process::id().to_string()])
                .status()
                .expect("send SIGTERM");
        });

        let result = Pipeline::new(PipelineConfig::default(), exec.clone())
            .run_until(
                &ctx,
                TriggerEvent::ChangeRequest { number: 11 },
                |_| Some("secret".to_string()),
                shutdown,
            )
            .await;

        assert_eq!(result.status, RunStatus::Aborted);
        assert_eq!(result.stages.last().unwrap().status, StageStatus::Aborted);
        assert_eq!(exec.commands().last().unwrap(), "docker stop 3-job");
        assert!(result.cleanup.iter().all(|o| o.success));
        assert!(!ws.exists());
    }

    #[test]
    fn test_plan_renders_without_credentials() {
        let ctx = JobContext::new("v2018.3.3-ca", None, "1", "job", "/ws");
        cmd_plan(&ctx, PipelineConfig::default(), true).expect("plan failed");
    }
}
