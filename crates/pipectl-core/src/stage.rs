//! Pipeline stages and the steps they expand to.

use crate::build_script::BuildScriptInvocation;
use crate::cleanup::CleanupAction;
use crate::command::CommandSpec;
use crate::config::PipelineConfig;
use crate::container::ContainerRuntime;
use crate::context::JobContext;
use crate::credentials::{CredentialNeeds, Credentials};
use crate::error::{PipelineError, Result};
use crate::gate::StageGate;
use serde::{Deserialize, Serialize};

/// The four pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// build.sh -b <build identifier>
    Build,

    /// Dependency install and test run inside the pinned container.
    UnitTests,

    /// Two dev-index publishes: latest and pinned.
    DeployStaging,

    /// Release-index publish with the index token.
    DeployRelease,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Build,
        StageKind::UnitTests,
        StageKind::DeployStaging,
        StageKind::DeployRelease,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Build => "build",
            StageKind::UnitTests => "unit_tests",
            StageKind::DeployStaging => "deploy_staging",
            StageKind::DeployRelease => "deploy_release",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            StageKind::Build => "Build",
            StageKind::UnitTests => "Run Unit Tests",
            StageKind::DeployStaging => "Deploy to staging package index",
            StageKind::DeployRelease => "Deploy to release package index",
        }
    }

    pub fn gate(&self) -> StageGate {
        match self {
            StageKind::DeployRelease => StageGate::ReleaseBranch,
            _ => StageGate::ChangeRequest,
        }
    }

    pub fn credential_needs(&self) -> CredentialNeeds {
        match self {
            StageKind::UnitTests => CredentialNeeds {
                registry: true,
                index_token: false,
            },
            StageKind::DeployRelease => CredentialNeeds {
                registry: false,
                index_token: true,
            },
            _ => CredentialNeeds::default(),
        }
    }

    /// Expand the stage into its ordered steps for this run.
    pub fn plan(
        &self,
        ctx: &JobContext,
        config: &PipelineConfig,
        credentials: &Credentials,
        runtime: &ContainerRuntime,
    ) -> Result<Vec<Step>> {
        let script = config.build_script.as_path();
        let ws = ctx.workspace.as_path();

        let steps = match self {
            StageKind::Build => {
                let cr = self.require_change_request(ctx)?;
                let id = cr.build_identifier();
                vec![Step::new(
                    StepKind::Script,
                    BuildScriptInvocation::build(id.as_str()).to_command(script, ws),
                )]
            }
            StageKind::UnitTests => {
                self.require_change_request(ctx)?;
                let name = ctx.container_name();
                let image = config.image_ref();
                let parallelism = config.test_parallelism.to_string();
                vec![
                    Step::new(
                        StepKind::RegistryLogin,
                        runtime.login(&config.registry, credentials.registry()?),
                    ),
                    Step::new(StepKind::ImagePull, runtime.pull(&image)),
                    Step::new(
                        StepKind::ContainerStart,
                        runtime.run_detached(&name, &image, ws),
                    )
                    .with_cleanup(CleanupAction::StopContainer {
                        name: name.clone(),
                        command: runtime.stop(&name),
                    }),
                    Step::new(
                        StepKind::ContainerExec,
                        runtime.exec(
                            &name,
                            ["pip", "install", "-r", config.requirements_file.as_str()],
                        ),
                    ),
                    Step::new(
                        StepKind::ContainerExec,
                        runtime.exec(
                            &name,
                            [
                                "python",
                                "-m",
                                "pytest",
                                "-n",
                                parallelism.as_str(),
                                "-q",
                                "--color=yes",
                                config.test_root.as_str(),
                            ],
                        ),
                    ),
                ]
            }
            StageKind::DeployStaging => {
                let cr = self.require_change_request(ctx)?;
                vec![
                    Step::new(
                        StepKind::Publish,
                        BuildScriptInvocation::dev_publish_latest(cr.latest_tag())
                            .to_command(script, ws),
                    ),
                    Step::new(
                        StepKind::Publish,
                        BuildScriptInvocation::dev_publish_pinned(cr.pinned_tag())
                            .to_command(script, ws),
                    ),
                ]
            }
            StageKind::DeployRelease => vec![Step::new(
                StepKind::Publish,
                BuildScriptInvocation::release_publish(credentials.index_token()?.clone())
                    .to_command(script, ws),
            )],
        };
        Ok(steps)
    }

    fn require_change_request(&self, ctx: &JobContext) -> Result<crate::build_id::ChangeRequest> {
        ctx.change_request.ok_or_else(|| {
            PipelineError::Config(format!("stage {} requires a change request", self.name()))
        })
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a step talks to; decides how its failure is classified.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Script,
    RegistryLogin,
    ImagePull,
    ContainerStart,
    ContainerExec,
    Publish,
}

impl StepKind {
    /// Error for a non-zero exit of this step.
    pub fn failure(&self, stage: StageKind, command: &CommandSpec, code: i32) -> PipelineError {
        let stage = stage.name().to_string();
        let command = command.to_string();
        match self {
            StepKind::Script => PipelineError::ScriptExit {
                stage,
                command,
                code,
            },
            StepKind::RegistryLogin | StepKind::ImagePull | StepKind::ContainerStart => {
                PipelineError::ContainerPull {
                    stage,
                    command,
                    code,
                }
            }
            StepKind::ContainerExec => PipelineError::ContainerExec {
                stage,
                command,
                code,
            },
            StepKind::Publish => PipelineError::Publish {
                stage,
                command,
                code,
            },
        }
    }
}

/// One command of a stage, optionally acquiring a resource that must be
/// released when the stage ends.
#[derive(Debug, Clone)]
pub struct Step {
    pub kind: StepKind,
    pub command: CommandSpec,
    pub cleanup: Option<CleanupAction>,
}

impl Step {
    pub fn new(kind: StepKind, command: CommandSpec) -> Self {
        Self {
            kind,
            command,
            cleanup: None,
        }
    }

    pub fn with_cleanup(mut self, action: CleanupAction) -> Self {
        self.cleanup = Some(action);
        self
    }
}
