//! Short-lived cross-account credentials.
//!
//! A [CredentialBroker] hands out at most one [CredentialSet] per invocation
//! attempt. Same-account environments never trigger an elevation call; for
//! cross-account environments the broker asks a [RoleElevator] for a session on
//! the target's invoke role, narrowed by a session policy to that one runner.

use std::future::Future;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use iam_rs::IAMPolicy;
use secret_string::SecretString;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument};

use crate::config::PipelineConfig;
use crate::environment::{Environment, InvocationTarget};
use crate::error::GateError;
use crate::policy;

/// Temporary credentials for one invocation, moved into the invoker and
/// dropped with it.
#[derive(Debug, PartialEq, Eq)]
pub struct CredentialSet {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl CredentialSet {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    pub(crate) fn expiry_as_system_time(&self) -> SystemTime {
        SystemTime::from(self.expires_at)
    }
}

/// Everything needed to ask for one elevated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevationRequest {
    pub role_arn: String,
    pub session_name: String,
    pub session_policy: IAMPolicy,
    pub duration: Duration,
}

/// Exchanges the orchestrator's identity for a session on another account's role.
pub trait RoleElevator {
    fn assume_role(
        &self,
        request: &ElevationRequest,
    ) -> impl Future<Output = Result<CredentialSet, GateError>> + Send;
}

/// [RoleElevator] backed by STS `AssumeRole`.
pub struct StsElevator {
    client: aws_sdk_sts::Client,
}

impl StsElevator {
    pub fn new(client: aws_sdk_sts::Client) -> Self {
        Self { client }
    }
}

impl RoleElevator for StsElevator {
    async fn assume_role(&self, request: &ElevationRequest) -> Result<CredentialSet, GateError> {
        let duration_secs = i32::try_from(request.duration.as_secs()).map_err(|_| {
            GateError::Configuration(format!(
                "Session duration {:?} is out of range",
                request.duration
            ))
        })?;
        let output = self
            .client
            .assume_role()
            .role_arn(&request.role_arn)
            .role_session_name(&request.session_name)
            .policy(policy::to_json(&request.session_policy)?)
            .duration_seconds(duration_secs)
            .send()
            .await
            .map_err(|err| {
                GateError::Authentication(format!(
                    "AssumeRole on {} was rejected: {}",
                    request.role_arn,
                    aws_sdk_sts::error::DisplayErrorContext(&err)
                ))
            })?;

        let credentials = output.credentials().ok_or_else(|| {
            GateError::Authentication(format!(
                "AssumeRole on {} returned no credentials",
                request.role_arn
            ))
        })?;
        let expires_at = DateTime::from_timestamp(credentials.expiration().secs(), 0)
            .ok_or_else(|| {
                GateError::Authentication("AssumeRole returned an invalid expiry".to_string())
            })?;

        Ok(CredentialSet {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: SecretString::new(credentials.secret_access_key()),
            session_token: SecretString::new(credentials.session_token()),
            expires_at,
        })
    }
}

pub struct CredentialBroker<E> {
    elevator: E,
    session_name: String,
    session_duration: Duration,
    timeout: Duration,
}

impl<E: RoleElevator> CredentialBroker<E> {
    pub fn new(elevator: E, config: &PipelineConfig) -> Self {
        Self {
            elevator,
            session_name: config.resource_attr.session_name.clone(),
            session_duration: config.timeouts.session_duration(),
            timeout: config.timeouts.authentication(),
        }
    }

    /// Returns `None` when the execution identity can already invoke the target.
    #[instrument(level = "debug", skip_all, fields(environment = %environment.name()))]
    pub async fn acquire(
        &self,
        environment: &Environment,
        target: &InvocationTarget,
    ) -> Result<Option<CredentialSet>, GateError> {
        if !environment.is_cross_account() {
            debug!("Same-account environment, no elevation needed");
            return Ok(None);
        }
        let role_arn = target.invoke_role_arn().ok_or_else(|| {
            GateError::Authentication(format!(
                "Environment '{}' is cross-account but has no invoke role",
                environment.name()
            ))
        })?;

        let session_policy = policy::session_policy(target);
        policy::ensure_scoped_to(&session_policy, target)?;
        let request = ElevationRequest {
            role_arn: role_arn.to_string(),
            session_name: self.session_name.clone(),
            session_policy,
            duration: self.session_duration,
        };

        info!(
            role_arn = %request.role_arn,
            session_name = %request.session_name,
            account_id = %environment.account_id(),
            "Requesting cross-account session"
        );
        let credentials = timeout(self.timeout, self.elevator.assume_role(&request))
            .await
            .map_err(|_| {
                error!(role_arn = %request.role_arn, timeout = ?self.timeout, "AssumeRole timed out");
                GateError::Authentication(format!(
                    "AssumeRole on {} timed out after {:?}",
                    request.role_arn, self.timeout
                ))
            })?
            .inspect_err(|err| error!(error = %err, "Cross-account elevation failed"))?;

        if credentials.is_expired() {
            return Err(GateError::Authentication(format!(
                "Credentials for {} expired on arrival",
                request.role_arn
            )));
        }
        info!(
            access_key_id = %credentials.access_key_id,
            expires_at = %credentials.expires_at,
            "Acquired cross-account session"
        );
        Ok(Some(credentials))
    }
}
