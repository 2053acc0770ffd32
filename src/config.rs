//! Pipeline definition loading and validation.
//!
//! The definition is a JSON document naming the pipeline, the account it runs
//! from, and the ordered stages with their target accounts. It is read once at
//! startup and threaded into every component as an explicit value.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::constants::{
    DEFAULT_APPROVAL_COMMENT, DEFAULT_AUTHENTICATION_TIMEOUT, DEFAULT_FUNCTION_NAME_PREFIX,
    DEFAULT_INVOCATION_TIMEOUT, DEFAULT_INVOKE_ROLE_NAME, DEFAULT_PIPELINE_NAME,
    DEFAULT_SESSION_NAME, MAX_SESSION_DURATION_SECS, MIN_SESSION_DURATION_SECS,
    PRODUCTION_STAGE_NAMES,
};
use crate::error::GateError;

static STAGE_NAME_VALIDATOR: LazyLock<regex::Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    regex::Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9-_]*$").expect("Failed to compile stage name regex")
});

static ACCOUNT_ID_VALIDATOR: LazyLock<regex::Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    regex::Regex::new(r"^[0-9]{12}$").expect("Failed to compile account id regex")
});

pub(crate) fn validate_account_id(account_id: &str) -> Result<(), GateError> {
    if ACCOUNT_ID_VALIDATOR.is_match(account_id) {
        Ok(())
    } else {
        Err(GateError::InvalidAccountId(account_id.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,
    pub region: String,
    /// Account the orchestrator runs as. Resolved through STS when omitted.
    #[serde(default)]
    pub pipeline_account_id: Option<String>,
    #[serde(default)]
    pub resource_attr: ResourceAttributes,
    #[serde(default)]
    pub timeouts: Timeouts,
    pub stages: Vec<StageConfig>,
}

fn default_pipeline_name() -> String {
    DEFAULT_PIPELINE_NAME.to_string()
}

/// Fields left out of `resourceAttr` keep their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceAttributes {
    /// Runner functions are named `{prefix}-{stage}`.
    pub schema_migration_fn_name: String,
    /// Role in each target account that is allowed to invoke its runner.
    pub cross_account_lambda_role: String,
    pub session_name: String,
}

impl Default for ResourceAttributes {
    fn default() -> Self {
        Self {
            schema_migration_fn_name: DEFAULT_FUNCTION_NAME_PREFIX.to_string(),
            cross_account_lambda_role: DEFAULT_INVOKE_ROLE_NAME.to_string(),
            session_name: DEFAULT_SESSION_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timeouts {
    pub authentication_secs: u64,
    pub invocation_secs: u64,
    pub session_duration_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            authentication_secs: DEFAULT_AUTHENTICATION_TIMEOUT.as_secs(),
            invocation_secs: DEFAULT_INVOCATION_TIMEOUT.as_secs(),
            session_duration_secs: MIN_SESSION_DURATION_SECS,
        }
    }
}

impl Timeouts {
    pub fn authentication(&self) -> Duration {
        Duration::from_secs(self.authentication_secs)
    }

    pub fn invocation(&self) -> Duration {
        Duration::from_secs(self.invocation_secs)
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_duration_secs)
    }
}

/// Either `"approval": true|false` or `"approval": { "comment": "..." }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ApprovalConfig {
    Toggle(bool),
    Gate {
        #[serde(default)]
        comment: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageConfig {
    pub name: String,
    pub account_id: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Overrides the derived `{prefix}-{stage}` runner name.
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub approval: Option<ApprovalConfig>,
    /// Command that deploys this stage's infrastructure, if the gate drives deployment.
    #[serde(default)]
    pub deploy_command: Option<Vec<String>>,
}

impl StageConfig {
    pub fn is_production(&self) -> bool {
        PRODUCTION_STAGE_NAMES
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&self.name))
    }

    /// The comment shown when asking for approval, or `None` when the stage runs ungated.
    pub fn approval_comment(&self) -> Result<Option<String>, GateError> {
        match (&self.approval, self.is_production()) {
            (Some(ApprovalConfig::Toggle(false)), true) => Err(GateError::Configuration(format!(
                "Stage '{}' is a production stage and cannot disable manual approval",
                self.name
            ))),
            (Some(ApprovalConfig::Toggle(false)), false) | (None, false) => Ok(None),
            (Some(ApprovalConfig::Toggle(true)), _) | (None, true) => {
                Ok(Some(DEFAULT_APPROVAL_COMMENT.to_string()))
            }
            (Some(ApprovalConfig::Gate { comment }), _) => Ok(Some(
                comment
                    .clone()
                    .unwrap_or_else(|| DEFAULT_APPROVAL_COMMENT.to_string()),
            )),
        }
    }
}

impl TryFrom<&Path> for PipelineConfig {
    type Error = GateError;

    fn try_from(path: &Path) -> Result<Self, Self::Error> {
        if !path.exists() {
            error!(config = ?path, "Pipeline config file does not exist");
            return Err(GateError::ConfigFileNotFound(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&contents)
            .inspect_err(|err| error!(config = ?path, error = %err, "Failed to parse pipeline config"))?;
        config.validate()?;
        info!(
            config = ?path,
            pipeline = %config.pipeline_name,
            stages = config.stages.len(),
            "Loaded pipeline config"
        );
        Ok(config)
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), GateError> {
        if self.stages.is_empty() {
            return Err(GateError::Configuration(
                "Pipeline must define at least one stage".to_string(),
            ));
        }
        if self.region.trim().is_empty() {
            return Err(GateError::Configuration(
                "Pipeline region must not be empty".to_string(),
            ));
        }
        if let Some(account_id) = &self.pipeline_account_id {
            validate_account_id(account_id)?;
        }

        let attrs = &self.resource_attr;
        for (field, value) in [
            ("schemaMigrationFnName", &attrs.schema_migration_fn_name),
            ("crossAccountLambdaRole", &attrs.cross_account_lambda_role),
            ("sessionName", &attrs.session_name),
        ] {
            if value.trim().is_empty() {
                return Err(GateError::Configuration(format!(
                    "resourceAttr.{field} must not be empty"
                )));
            }
        }

        let timeouts = &self.timeouts;
        if timeouts.authentication_secs == 0 || timeouts.invocation_secs == 0 {
            return Err(GateError::Configuration(
                "Timeouts must be greater than zero".to_string(),
            ));
        }
        if !(MIN_SESSION_DURATION_SECS..=MAX_SESSION_DURATION_SECS)
            .contains(&timeouts.session_duration_secs)
        {
            return Err(GateError::Configuration(format!(
                "sessionDurationSecs must be between {MIN_SESSION_DURATION_SECS} and {MAX_SESSION_DURATION_SECS}"
            )));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !STAGE_NAME_VALIDATOR.is_match(&stage.name) {
                return Err(GateError::InvalidStageName(stage.name.clone()));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(GateError::Configuration(format!(
                    "Stage '{}' is defined more than once",
                    stage.name
                )));
            }
            validate_account_id(&stage.account_id)?;
            if let Some(command) = &stage.deploy_command
                && command.is_empty()
            {
                return Err(GateError::Configuration(format!(
                    "Stage '{}' has an empty deployCommand",
                    stage.name
                )));
            }
            stage.approval_comment()?;
            debug!(stage = %stage.name, account_id = %stage.account_id, "Validated stage");
        }
        Ok(())
    }

    pub fn stage(&self, name: &str) -> Result<&StageConfig, GateError> {
        self.stages
            .iter()
            .find(|stage| stage.name == name)
            .ok_or_else(|| GateError::UnknownStage(name.to_string()))
    }
}
