//! Stage sequencing and gating.
//!
//! Stages run strictly in declared order. Each one optionally waits for a
//! manual approval, deploys, then runs its post-deploy gate: acquire
//! credentials, invoke the runner, classify the result. Anything other than a
//! passed gate halts the whole run, and later stages are never entered.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

use crate::approval::{ApprovalDecision, ApprovalGate};
use crate::classifier::{GateOutcome, classify};
use crate::config::PipelineConfig;
use crate::constants::{
    EXIT_AUTHENTICATION_FAILED, EXIT_CONFIGURATION_ERROR, EXIT_DEPLOYMENT_FAILED,
    EXIT_INVOCATION_FAILED, EXIT_MIGRATION_FAILED, EXIT_PASSED,
};
use crate::credentials::{CredentialBroker, RoleElevator};
use crate::deploy::StageDeployer;
use crate::environment::{Environment, InvocationTarget};
use crate::error::GateError;
use crate::invoker::MigrationInvoker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageState {
    Pending,
    PreGateWait,
    Deploying,
    Deployed,
    PostGateRunning,
    Passed,
    Failed,
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// One environment's deploy-then-verify unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStage {
    environment: Environment,
    target: InvocationTarget,
    approval_comment: Option<String>,
    deploy_command: Vec<String>,
}

impl PipelineStage {
    pub fn new(
        environment: Environment,
        target: InvocationTarget,
        approval_comment: Option<String>,
        deploy_command: Vec<String>,
    ) -> Self {
        Self {
            environment,
            target,
            approval_comment,
            deploy_command,
        }
    }

    pub fn name(&self) -> &str {
        self.environment.name()
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn target(&self) -> &InvocationTarget {
        &self.target
    }

    /// Present when the stage must wait for a manual approval.
    pub fn approval_comment(&self) -> Option<&str> {
        self.approval_comment.as_deref()
    }

    pub fn deploy_command(&self) -> &[String] {
        &self.deploy_command
    }
}

/// Builds the ordered stages, deciding once per environment whether it is
/// cross-account.
pub fn define_stages(
    config: &PipelineConfig,
    execution_account_id: &str,
) -> Result<Vec<PipelineStage>, GateError> {
    config
        .stages
        .iter()
        .map(|stage| -> Result<PipelineStage, GateError> {
            let region = stage.region.as_deref().unwrap_or(&config.region);
            let environment =
                Environment::new(&stage.name, &stage.account_id, region, execution_account_id);
            let target = InvocationTarget::for_environment(
                &environment,
                &config.resource_attr,
                stage.function_name.as_deref(),
            );
            Ok(PipelineStage::new(
                environment,
                target,
                stage.approval_comment()?,
                stage.deploy_command.clone().unwrap_or_default(),
            ))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Authentication,
    Invocation,
    Migration,
    Deployment,
    Approval,
    Configuration,
}

impl FailureCategory {
    pub fn exit_code(&self) -> u8 {
        match self {
            FailureCategory::Migration => EXIT_MIGRATION_FAILED,
            FailureCategory::Invocation => EXIT_INVOCATION_FAILED,
            FailureCategory::Authentication => EXIT_AUTHENTICATION_FAILED,
            FailureCategory::Deployment | FailureCategory::Approval => EXIT_DEPLOYMENT_FAILED,
            FailureCategory::Configuration => EXIT_CONFIGURATION_ERROR,
        }
    }
}

impl From<&GateError> for FailureCategory {
    fn from(err: &GateError) -> Self {
        match err {
            GateError::Authentication(_) => FailureCategory::Authentication,
            GateError::Invocation(_) | GateError::Io(_) => FailureCategory::Invocation,
            GateError::Deployment(_) => FailureCategory::Deployment,
            GateError::ConfigFileNotFound(_)
            | GateError::Configuration(_)
            | GateError::IamEvaluation(_)
            | GateError::InvalidAccountId(_)
            | GateError::InvalidStageName(_)
            | GateError::SerdeJson(_)
            | GateError::UnknownStage(_) => FailureCategory::Configuration,
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureCategory::Authentication => "authentication",
            FailureCategory::Invocation => "invocation",
            FailureCategory::Migration => "migration",
            FailureCategory::Deployment => "deployment",
            FailureCategory::Approval => "approval",
            FailureCategory::Configuration => "configuration",
        };
        f.write_str(label)
    }
}

/// Why a run halted, with the raw payload of whichever layer failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub stage: String,
    pub category: FailureCategory,
    pub message: String,
    pub error: Option<Value>,
    pub raw_log: Option<String>,
}

impl Diagnostic {
    fn new(stage: &PipelineStage, category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            stage: stage.name().to_string(),
            category,
            message: message.into(),
            error: None,
            raw_log: None,
        }
    }

    /// Categorised by what went wrong, not by where.
    fn from_error(stage: &PipelineStage, err: &GateError) -> Self {
        Self::new(stage, FailureCategory::from(err), err.to_string())
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Stage '{}' halted ({} failure): {}",
            self.stage, self.category, self.message
        )?;
        if let Some(error) = &self.error {
            write!(f, "\nError: {}", error)?;
        }
        Ok(())
    }
}

/// The result of one post-deploy gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateEvaluation {
    pub outcome: GateOutcome,
    pub raw_log: Option<String>,
}

impl GateEvaluation {
    /// `None` when the gate passed.
    pub fn diagnostic(&self, stage: &PipelineStage) -> Option<Diagnostic> {
        let (category, message, error) = match &self.outcome {
            GateOutcome::Passed { .. } => return None,
            GateOutcome::MigrationFailed { message, error } => (
                FailureCategory::Migration,
                message
                    .clone()
                    .unwrap_or_else(|| "Runner reported a migration failure".to_string()),
                error.clone(),
            ),
            GateOutcome::InvocationFailed { reason } => {
                (FailureCategory::Invocation, reason.clone(), None)
            }
        };
        Some(Diagnostic {
            error,
            raw_log: self.raw_log.clone(),
            ..Diagnostic::new(stage, category, message)
        })
    }
}

/// Credential broker, invoker and classifier composed into a stage's post-condition.
pub struct PostDeployGate<E, I> {
    broker: CredentialBroker<E>,
    invoker: I,
    invocation_timeout: Duration,
}

impl<E: RoleElevator, I: MigrationInvoker> PostDeployGate<E, I> {
    pub fn new(broker: CredentialBroker<E>, invoker: I, config: &PipelineConfig) -> Self {
        Self {
            broker,
            invoker,
            invocation_timeout: config.timeouts.invocation(),
        }
    }

    /// Fails only when credentials cannot be acquired. Invocation problems,
    /// including a runner that never answers, come back as
    /// [GateOutcome::InvocationFailed] so they gate like any other failure.
    #[instrument(level = "info", skip_all, fields(stage = %stage.name()))]
    pub async fn evaluate(&self, stage: &PipelineStage) -> Result<GateEvaluation, GateError> {
        let credentials = self
            .broker
            .acquire(stage.environment(), stage.target())
            .await?;

        let call = self.invoker.invoke(stage.target(), credentials);
        let result = match timeout(self.invocation_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                error!(timeout = ?self.invocation_timeout, "Runner did not answer in time");
                Err(GateError::Invocation(format!(
                    "{} did not complete within {:?}",
                    stage.target().function_name(),
                    self.invocation_timeout
                )))
            }
        };
        let evaluation = match result {
            Ok(result) => GateEvaluation {
                outcome: classify(&result),
                raw_log: result.raw_log,
            },
            Err(err) => {
                error!(error = %err, "Runner invocation failed");
                GateEvaluation {
                    outcome: GateOutcome::InvocationFailed {
                        reason: err.to_string(),
                    },
                    raw_log: None,
                }
            }
        };
        info!(outcome = evaluation.outcome.label(), "Post-deploy gate finished");
        Ok(evaluation)
    }

    /// Runs the gate and folds every failure into a [Diagnostic].
    pub async fn check(&self, stage: &PipelineStage) -> Result<GateEvaluation, Diagnostic> {
        match self.evaluate(stage).await {
            Ok(evaluation) => match evaluation.diagnostic(stage) {
                Some(diagnostic) => Err(diagnostic),
                None => Ok(evaluation),
            },
            Err(err) => Err(Diagnostic::from_error(stage, &err)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub name: String,
    pub history: Vec<StageState>,
    pub gate_outcome: Option<GateOutcome>,
}

impl StageRecord {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            history: vec![StageState::Pending],
            gate_outcome: None,
        }
    }

    pub fn state(&self) -> StageState {
        self.history
            .last()
            .copied()
            .unwrap_or(StageState::Pending)
    }

    pub fn reached(&self, state: StageState) -> bool {
        self.history.contains(&state)
    }

    fn transition(&mut self, to: StageState) {
        info!(stage = %self.name, from = %self.state(), to = %to, "Stage transition");
        self.history.push(to);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result")]
pub enum RunOutcome {
    Passed,
    Halted(Diagnostic),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub stages: Vec<StageRecord>,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|record| record.name == name)
    }

    pub fn exit_code(&self) -> u8 {
        match &self.outcome {
            RunOutcome::Passed => EXIT_PASSED,
            RunOutcome::Halted(diagnostic) => diagnostic.category.exit_code(),
        }
    }
}

pub struct StageGateController<E, I, D, A> {
    gate: PostDeployGate<E, I>,
    deployer: D,
    approvals: A,
}

impl<E, I, D, A> StageGateController<E, I, D, A>
where
    E: RoleElevator,
    I: MigrationInvoker,
    D: StageDeployer,
    A: ApprovalGate,
{
    pub fn new(gate: PostDeployGate<E, I>, deployer: D, approvals: A) -> Self {
        Self {
            gate,
            deployer,
            approvals,
        }
    }

    pub async fn run(&self, stages: &[PipelineStage]) -> RunReport {
        let mut records: Vec<StageRecord> = stages
            .iter()
            .map(|stage| StageRecord::new(stage.name()))
            .collect();

        for (index, stage) in stages.iter().enumerate() {
            let result = self.run_stage(stage, &mut records[index]).await;
            let record = &mut records[index];
            if let Err(diagnostic) = result {
                record.transition(StageState::Failed);
                error!(
                    stage = %diagnostic.stage,
                    category = %diagnostic.category,
                    message = %diagnostic.message,
                    error = ?diagnostic.error,
                    "Pipeline halted"
                );
                return RunReport {
                    stages: records,
                    outcome: RunOutcome::Halted(diagnostic),
                };
            }
            record.transition(StageState::Passed);
        }
        info!(stages = records.len(), "Pipeline passed");
        RunReport {
            stages: records,
            outcome: RunOutcome::Passed,
        }
    }

    async fn run_stage(
        &self,
        stage: &PipelineStage,
        record: &mut StageRecord,
    ) -> Result<(), Diagnostic> {
        if let Some(comment) = stage.approval_comment() {
            record.transition(StageState::PreGateWait);
            match self.approvals.request_approval(stage.name(), comment).await {
                Ok(ApprovalDecision::Approved) => {}
                Ok(ApprovalDecision::Rejected { reason }) => {
                    warn!(stage = %stage.name(), reason = %reason, "Approval rejected");
                    return Err(Diagnostic::new(
                        stage,
                        FailureCategory::Approval,
                        format!("Approval rejected: {reason}"),
                    ));
                }
                Err(err) => {
                    return Err(Diagnostic::new(
                        stage,
                        FailureCategory::Approval,
                        err.to_string(),
                    ));
                }
            }
        }

        record.transition(StageState::Deploying);
        self.deployer.deploy(stage).await.map_err(|err| {
            Diagnostic::new(stage, FailureCategory::Deployment, err.to_string())
        })?;
        record.transition(StageState::Deployed);

        record.transition(StageState::PostGateRunning);
        let evaluation = self
            .gate
            .evaluate(stage)
            .await
            .map_err(|err| Diagnostic::from_error(stage, &err))?;
        record.gate_outcome = Some(evaluation.outcome.clone());
        match evaluation.diagnostic(stage) {
            Some(diagnostic) => Err(diagnostic),
            None => Ok(()),
        }
    }
}
