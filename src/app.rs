//! Wires the pipeline definition, AWS clients and the controller together for
//! each subcommand.

use std::future::Future;
use std::path::{Path, PathBuf};

use aws_config::BehaviorVersion;
use aws_sdk_sts::config::Region;
use tracing::{error, info, warn};

use crate::approval::{ApprovalGate, ConsoleApproval, PreApproved};
use crate::cli::{Cli, Command};
use crate::config::PipelineConfig;
use crate::constants::{EXIT_ABORTED, EXIT_PASSED, FUNCTION_NAME_ENV};
use crate::credentials::{CredentialBroker, StsElevator};
use crate::deploy::CommandDeployer;
use crate::environment::{InvocationTarget, resolve_execution_account};
use crate::error::GateError;
use crate::invoker::LambdaInvoker;
use crate::pipeline::{
    PipelineStage, PostDeployGate, RunOutcome, RunReport, StageGateController, define_stages,
};
use crate::policy::{self, session_policy, step_role_policy};

pub struct App {
    config_path: PathBuf,
    command: Command,
}

type AwsGate = PostDeployGate<StsElevator, LambdaInvoker>;

impl App {
    pub fn new(cli: Cli) -> Self {
        Self {
            config_path: cli.config,
            command: cli.command,
        }
    }

    /// Returns the process exit status.
    pub async fn run(self) -> Result<u8, GateError> {
        let config = PipelineConfig::try_from(self.config_path.as_path())?;
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;
        let sts = aws_sdk_sts::Client::new(&sdk_config);
        let execution_account = resolve_execution_account(&config, &sts).await?;
        let stages = define_stages(&config, &execution_account)?;

        match self.command {
            Command::Plan => {
                print_plan(&config, &execution_account, &stages)?;
                Ok(EXIT_PASSED)
            }
            Command::PostDeploy {
                stage,
                function_name,
            } => {
                let stage = select_stage(&config, &stages, &stage, function_name.as_deref())?;
                let gate = build_gate(&config, sdk_config, sts);
                Ok(until_interrupted(post_deploy(&gate, &stage)).await)
            }
            Command::Run {
                approved_by,
                report,
            } => {
                let gate = build_gate(&config, sdk_config, sts);
                let code = match approved_by {
                    Some(approver) => {
                        let approvals = PreApproved { approver };
                        until_interrupted(run_pipeline(gate, approvals, &stages, report.as_deref()))
                            .await
                    }
                    None => {
                        until_interrupted(run_pipeline(
                            gate,
                            ConsoleApproval::stdin(),
                            &stages,
                            report.as_deref(),
                        ))
                        .await
                    }
                };
                Ok(code)
            }
        }
    }
}

fn build_gate(
    config: &PipelineConfig,
    sdk_config: aws_config::SdkConfig,
    sts: aws_sdk_sts::Client,
) -> AwsGate {
    let broker = CredentialBroker::new(StsElevator::new(sts), config);
    PostDeployGate::new(broker, LambdaInvoker::new(sdk_config), config)
}

/// Finds the named stage, re-binding its target when the runner name was overridden.
fn select_stage(
    config: &PipelineConfig,
    stages: &[PipelineStage],
    name: &str,
    function_name: Option<&str>,
) -> Result<PipelineStage, GateError> {
    let stage = stages
        .iter()
        .find(|stage| stage.name() == name)
        .ok_or_else(|| GateError::UnknownStage(name.to_string()))?;
    let Some(function_name) = function_name else {
        return Ok(stage.clone());
    };
    info!(stage = %name, function_name = %function_name, "Using runner name from {}", FUNCTION_NAME_ENV);
    let target = InvocationTarget::for_environment(
        stage.environment(),
        &config.resource_attr,
        Some(function_name),
    );
    Ok(PipelineStage::new(
        stage.environment().clone(),
        target,
        stage.approval_comment().map(str::to_string),
        stage.deploy_command().to_vec(),
    ))
}

/// Anything interrupted is reported as a failure, never as a pass.
async fn until_interrupted(work: impl Future<Output = u8>) -> u8 {
    tokio::select! {
        code = work => code,
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                error!(error = %err, "Failed to listen for interrupt");
            }
            warn!("Interrupted before the gate completed, treating the run as failed");
            EXIT_ABORTED
        }
    }
}

async fn post_deploy(gate: &AwsGate, stage: &PipelineStage) -> u8 {
    match gate.check(stage).await {
        Ok(evaluation) => {
            info!(stage = %stage.name(), outcome = %evaluation.outcome, "Post-deploy gate passed");
            println!("{}", evaluation.outcome);
            EXIT_PASSED
        }
        Err(diagnostic) => {
            error!(stage = %diagnostic.stage, category = %diagnostic.category, "Post-deploy gate failed");
            eprintln!("{}", diagnostic);
            diagnostic.category.exit_code()
        }
    }
}

async fn run_pipeline<A: ApprovalGate>(
    gate: AwsGate,
    approvals: A,
    stages: &[PipelineStage],
    report_path: Option<&Path>,
) -> u8 {
    let controller = StageGateController::new(gate, CommandDeployer, approvals);
    let report = controller.run(stages).await;
    print_summary(&report);
    if let Some(path) = report_path
        && let Err(err) = write_report(&report, path).await
    {
        error!(report = ?path, error = %err, "Failed to write run report");
    }
    report.exit_code()
}

fn print_summary(report: &RunReport) {
    for record in &report.stages {
        println!("{:<12} {}", record.name, record.state());
    }
    match &report.outcome {
        RunOutcome::Passed => println!("Pipeline passed"),
        RunOutcome::Halted(diagnostic) => {
            eprintln!("{}", diagnostic);
            if let Some(raw_log) = &diagnostic.raw_log {
                eprintln!("Runner log:\n{}", raw_log);
            }
        }
    }
}

async fn write_report(report: &RunReport, path: &Path) -> Result<(), GateError> {
    let json = serde_json::to_string_pretty(report)?;
    tokio::fs::write(path, json).await?;
    info!(report = ?path, "Wrote run report");
    Ok(())
}

fn print_plan(
    config: &PipelineConfig,
    execution_account: &str,
    stages: &[PipelineStage],
) -> Result<(), GateError> {
    println!(
        "Pipeline {} running as account {}",
        config.pipeline_name, execution_account
    );
    for (position, stage) in stages.iter().enumerate() {
        let environment = stage.environment();
        let target = stage.target();
        println!();
        println!(
            "{}. {} ({} / {})",
            position + 1,
            stage.name(),
            environment.account_id(),
            environment.region()
        );
        println!("   cross-account: {}", environment.is_cross_account());
        println!("   runner:        {}", target.function_arn());
        if let Some(role_arn) = target.invoke_role_arn() {
            println!("   invoke role:   {}", role_arn);
            println!(
                "   session policy:\n{}",
                policy::to_json_pretty(&session_policy(target))?
            );
        }
        if let Some(comment) = stage.approval_comment() {
            println!("   approval:      {}", comment);
        }
        if !stage.deploy_command().is_empty() {
            println!("   deploy:        {}", stage.deploy_command().join(" "));
        }
        println!(
            "   step role policy:\n{}",
            policy::to_json_pretty(&step_role_policy(target))?
        );
    }
    Ok(())
}
