
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration as ChronoDuration, Utc};
use secret_string::SecretString;
use serde_json::{Value, json};

use crate::approval::{ApprovalDecision, ApprovalGate};
use crate::config::PipelineConfig;
use crate::credentials::{CredentialBroker, CredentialSet, ElevationRequest, RoleElevator};
use crate::deploy::StageDeployer;
use crate::environment::InvocationTarget;
use crate::error::GateError;
use crate::invoker::{InvocationResult, MigrationInvoker};
use crate::pipeline::{PipelineStage, PostDeployGate, StageGateController, define_stages};

pub(crate) const PIPELINE_ACCOUNT: &str = "111111111111";
pub(crate) const DEV_ACCOUNT: &str = "222222222222";
pub(crate) const PROD_ACCOUNT: &str = "333333333333";

/// Shared, ordered record of what every fake was asked to do.
#[derive(Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub(crate) fn push(&self, event: impl Into<String>) {
        self.0.lock().expect("event log poisoned").push(event.into());
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.0.lock().expect("event log poisoned").clone()
    }

    pub(crate) fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    pub(crate) fn contains(&self, event: &str) -> bool {
        self.position(event).is_some()
    }
}

pub(crate) fn pipeline_config(authentication_secs: u64) -> PipelineConfig {
    serde_json::from_value(json!({
        "region": "us-east-1",
        "pipelineAccountId": PIPELINE_ACCOUNT,
        "timeouts": {
            "authenticationSecs": authentication_secs,
            "invocationSecs": 60,
            "sessionDurationSecs": 900
        },
        "stages": [
            { "name": "dev", "accountId": DEV_ACCOUNT },
            { "name": "prod", "accountId": PROD_ACCOUNT }
        ]
    }))
    .expect("Failed to build pipeline config")
}

pub(crate) fn stages(config: &PipelineConfig, execution_account: &str) -> Vec<PipelineStage> {
    define_stages(config, execution_account).expect("Failed to define stages")
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum Elevation {
    Grant,
    Reject,
    Hang,
    Expired,
    /// What STS elevation reports for a session duration it cannot send.
    Misconfigured,
}

#[derive(Clone)]
pub(crate) struct FakeElevator {
    pub(crate) behaviour: Elevation,
    pub(crate) calls: Arc<AtomicUsize>,
    pub(crate) requests: Arc<Mutex<Vec<ElevationRequest>>>,
    pub(crate) events: EventLog,
}

impl FakeElevator {
    pub(crate) fn new(behaviour: Elevation, events: EventLog) -> Self {
        Self {
            behaviour,
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            events,
        }
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RoleElevator for FakeElevator {
    async fn assume_role(&self, request: &ElevationRequest) -> Result<CredentialSet, GateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .expect("requests poisoned")
            .push(request.clone());
        self.events.push(format!("elevate:{}", request.role_arn));

        let expires_at = match self.behaviour {
            Elevation::Grant => Utc::now() + ChronoDuration::minutes(15),
            Elevation::Expired => Utc::now() - ChronoDuration::minutes(1),
            Elevation::Reject => {
                return Err(GateError::Authentication(format!(
                    "AccessDenied on {}",
                    request.role_arn
                )));
            }
            Elevation::Hang => std::future::pending().await,
            Elevation::Misconfigured => {
                return Err(GateError::Configuration(
                    "Session duration 4294967296s is out of range".to_string(),
                ));
            }
        };
        Ok(CredentialSet {
            access_key_id: "ASIATESTKEY".to_string(),
            secret_access_key: SecretString::new("secret"),
            session_token: SecretString::new("token"),
            expires_at,
        })
    }
}

/// What the fake runner does for one function name.
#[derive(Clone, Debug)]
pub(crate) enum Script {
    Respond(Value),
    Fail(String),
    Hang,
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedInvoker {
    pub(crate) scripts: HashMap<String, Script>,
    pub(crate) events: EventLog,
}

impl ScriptedInvoker {
    pub(crate) fn new(events: EventLog) -> Self {
        Self {
            scripts: HashMap::new(),
            events,
        }
    }

    pub(crate) fn respond(mut self, stage: &str, body: Value) -> Self {
        self.scripts
            .insert(runner_name(stage), Script::Respond(body));
        self
    }

    pub(crate) fn fail(mut self, stage: &str, reason: &str) -> Self {
        self.scripts
            .insert(runner_name(stage), Script::Fail(reason.to_string()));
        self
    }

    /// The runner never answers.
    pub(crate) fn hang(mut self, stage: &str) -> Self {
        self.scripts.insert(runner_name(stage), Script::Hang);
        self
    }
}

pub(crate) fn runner_name(stage: &str) -> String {
    format!("RDSSchemaMigrationFunction-{stage}")
}

impl MigrationInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        target: &InvocationTarget,
        credentials: Option<CredentialSet>,
    ) -> Result<InvocationResult, GateError> {
        let mode = if credentials.is_some() {
            "elevated"
        } else {
            "direct"
        };
        self.events
            .push(format!("invoke:{}:{}", target.function_name(), mode));
        match self.scripts.get(target.function_name()) {
            Some(Script::Respond(body)) => InvocationResult::from_payload(
                body.to_string().as_bytes(),
                Some(format!("START {}\nEND\n", target.function_name())),
            ),
            Some(Script::Fail(reason)) => Err(GateError::Invocation(reason.clone())),
            Some(Script::Hang) => std::future::pending().await,
            None => Err(GateError::Invocation(format!(
                "Function not found: {}",
                target.function_name()
            ))),
        }
    }
}

pub(crate) struct RecordingDeployer {
    pub(crate) fail_stage: Option<String>,
    pub(crate) events: EventLog,
}

impl StageDeployer for RecordingDeployer {
    async fn deploy(&self, stage: &PipelineStage) -> Result<(), GateError> {
        self.events.push(format!("deploy:{}", stage.name()));
        if self.fail_stage.as_deref() == Some(stage.name()) {
            return Err(GateError::Deployment(format!(
                "stack update for {} rolled back",
                stage.name()
            )));
        }
        Ok(())
    }
}

pub(crate) struct RecordingApproval {
    pub(crate) decision: ApprovalDecision,
    pub(crate) events: EventLog,
}

impl ApprovalGate for RecordingApproval {
    async fn request_approval(
        &self,
        stage: &str,
        _comment: &str,
    ) -> Result<ApprovalDecision, GateError> {
        self.events.push(format!("approve:{stage}"));
        Ok(self.decision.clone())
    }
}

pub(crate) fn passed_body(message: &str) -> Value {
    json!({ "StatusCode": 200, "Message": message })
}

pub(crate) type TestController =
    StageGateController<FakeElevator, ScriptedInvoker, RecordingDeployer, RecordingApproval>;

pub(crate) fn controller(
    config: &PipelineConfig,
    elevator: FakeElevator,
    invoker: ScriptedInvoker,
    fail_deploy: Option<&str>,
    decision: ApprovalDecision,
    events: &EventLog,
) -> TestController {
    let gate = PostDeployGate::new(CredentialBroker::new(elevator, config), invoker, config);
    StageGateController::new(
        gate,
        RecordingDeployer {
            fail_stage: fail_deploy.map(str::to_string),
            events: events.clone(),
        },
        RecordingApproval {
            decision,
            events: events.clone(),
        },
    )
}
