//! Centralized error types for the migration gate.

use std::path::PathBuf;

use serde::Serialize;
use serde_with::{DisplayFromStr, serde_as};

#[serde_as]
#[derive(Serialize, Debug)]
pub enum GateError {
    /// Cross-account elevation was denied, timed out, or returned no credentials.
    Authentication(String),
    /// The runner could not be reached, or answered outside its response contract.
    Invocation(String),
    ConfigFileNotFound(PathBuf),
    Configuration(String),
    Deployment(String),
    IamEvaluation(#[serde_as(as = "DisplayFromStr")] iam_rs::EvaluationError),
    InvalidAccountId(String),
    InvalidStageName(String),
    Io(#[serde_as(as = "DisplayFromStr")] std::io::Error),
    SerdeJson(#[serde_as(as = "DisplayFromStr")] serde_json::Error),
    UnknownStage(String),
}

impl std::fmt::Display for GateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateError::Authentication(msg) => write!(f, "Authentication Error: {}", msg),
            GateError::Invocation(msg) => write!(f, "Invocation Error: {}", msg),
            GateError::ConfigFileNotFound(path) => {
                write!(f, "Pipeline config not found: {}", path.display())
            }
            GateError::Configuration(msg) => write!(f, "Configuration Error: {}", msg),
            GateError::Deployment(msg) => write!(f, "Deployment Error: {}", msg),
            GateError::IamEvaluation(e) => write!(f, "IAM Evaluation Error: {}", e),
            GateError::InvalidAccountId(account) => {
                write!(f, "Invalid AWS account id '{account}', expected 12 digits")
            }
            GateError::InvalidStageName(name) => write!(f, "Invalid stage name '{name}'"),
            GateError::Io(e) => write!(f, "IO Error: {:?}", e),
            GateError::SerdeJson(e) => write!(f, "Serde-JSON Error: {}", e),
            GateError::UnknownStage(name) => write!(f, "Stage '{name}' is not defined"),
        }
    }
}

impl std::error::Error for GateError {}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        GateError::SerdeJson(err)
    }
}

impl From<std::io::Error> for GateError {
    fn from(err: std::io::Error) -> Self {
        GateError::Io(err)
    }
}

impl From<iam_rs::EvaluationError> for GateError {
    fn from(err: iam_rs::EvaluationError) -> Self {
        GateError::IamEvaluation(err)
    }
}

impl From<iam_rs::ArnError> for GateError {
    fn from(err: iam_rs::ArnError) -> Self {
        GateError::Configuration(format!("Failed to parse ARN: {}", err))
    }
}

impl From<aws_sdk_sts::error::SdkError<aws_sdk_sts::operation::get_caller_identity::GetCallerIdentityError>>
    for GateError
{
    fn from(
        err: aws_sdk_sts::error::SdkError<
            aws_sdk_sts::operation::get_caller_identity::GetCallerIdentityError,
        >,
    ) -> Self {
        GateError::Configuration(format!(
            "Failed to resolve the execution identity: {}",
            aws_sdk_sts::error::DisplayErrorContext(&err)
        ))
    }
}
