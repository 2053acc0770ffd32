//! Deployment environments and the runner each one exposes.

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{PipelineConfig, ResourceAttributes, validate_account_id};
use crate::error::GateError;

/// A deployment target. Built once from the pipeline definition and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    name: String,
    account_id: String,
    region: String,
    is_cross_account: bool,
}

impl Environment {
    /// `execution_account_id` is the account the orchestrator itself runs as.
    pub fn new(
        name: impl Into<String>,
        account_id: impl Into<String>,
        region: impl Into<String>,
        execution_account_id: &str,
    ) -> Self {
        let account_id = account_id.into();
        let is_cross_account = account_id != execution_account_id;
        Self {
            name: name.into(),
            account_id,
            region: region.into(),
            is_cross_account,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn is_cross_account(&self) -> bool {
        self.is_cross_account
    }
}

/// The addressable migration runner of one [Environment].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationTarget {
    function_name: String,
    function_arn: String,
    region: String,
    /// Only present when the environment lives in another account.
    invoke_role_arn: Option<String>,
}

impl InvocationTarget {
    pub fn for_environment(
        environment: &Environment,
        attrs: &ResourceAttributes,
        function_name: Option<&str>,
    ) -> Self {
        let function_name = function_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}-{}", attrs.schema_migration_fn_name, environment.name()));
        let function_arn = format!(
            "arn:aws:lambda:{}:{}:function:{}",
            environment.region(),
            environment.account_id(),
            function_name
        );
        let invoke_role_arn = environment.is_cross_account().then(|| {
            format!(
                "arn:aws:iam::{}:role/{}",
                environment.account_id(),
                attrs.cross_account_lambda_role
            )
        });
        debug!(
            environment = %environment.name(),
            function_arn = %function_arn,
            invoke_role_arn = ?invoke_role_arn,
            "Bound invocation target"
        );
        Self {
            function_name,
            function_arn,
            region: environment.region().to_string(),
            invoke_role_arn,
        }
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn function_arn(&self) -> &str {
        &self.function_arn
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn invoke_role_arn(&self) -> Option<&str> {
        self.invoke_role_arn.as_deref()
    }
}

/// Works out which account the orchestrator runs as, asking STS only when the
/// pipeline definition doesn't say.
pub async fn resolve_execution_account(
    config: &PipelineConfig,
    client: &aws_sdk_sts::Client,
) -> Result<String, GateError> {
    if let Some(account_id) = &config.pipeline_account_id {
        debug!(account_id = %account_id, "Using configured pipeline account");
        return Ok(account_id.clone());
    }
    let identity = client.get_caller_identity().send().await?;
    let account_id = identity.account().ok_or_else(|| {
        GateError::Configuration("STS did not return an account for the caller".to_string())
    })?;
    validate_account_id(account_id)?;
    info!(account_id = %account_id, arn = ?identity.arn(), "Resolved execution identity");
    Ok(account_id.to_string())
}
