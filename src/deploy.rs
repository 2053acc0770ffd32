//! Hook for deploying a stage's infrastructure before its gate runs.

use std::future::Future;

use tokio::process::Command;
use tracing::{error, info};

use crate::error::GateError;
use crate::pipeline::PipelineStage;

pub trait StageDeployer {
    fn deploy(&self, stage: &PipelineStage) -> impl Future<Output = Result<(), GateError>> + Send;
}

/// Runs the stage's `deployCommand`. Stages without one are assumed to have
/// been deployed by whatever invoked the pipeline.
#[derive(Debug, Default)]
pub struct CommandDeployer;

impl StageDeployer for CommandDeployer {
    async fn deploy(&self, stage: &PipelineStage) -> Result<(), GateError> {
        let Some((program, args)) = stage.deploy_command().split_first() else {
            info!(stage = %stage.name(), "No deploy command, treating stage as deployed externally");
            return Ok(());
        };
        info!(stage = %stage.name(), program = %program, args = ?args, "Deploying stage");
        let status = Command::new(program)
            .args(args)
            .env("MIGRATION_GATE_STAGE", stage.name())
            .env("AWS_REGION", stage.environment().region())
            .status()
            .await
            .map_err(|err| {
                GateError::Deployment(format!(
                    "Failed to start '{program}' for stage '{}': {err}",
                    stage.name()
                ))
            })?;
        if status.success() {
            info!(stage = %stage.name(), "Stage deployed");
            Ok(())
        } else {
            error!(stage = %stage.name(), status = %status, "Deploy command failed");
            Err(GateError::Deployment(format!(
                "Deploy command for stage '{}' exited with {status}",
                stage.name()
            )))
        }
    }
}
