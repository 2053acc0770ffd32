//! Turns a runner result into a gate decision.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::{STATUS_MIGRATION_FAILED, STATUS_SUCCESS};
use crate::invoker::InvocationResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome")]
pub enum GateOutcome {
    Passed {
        message: Option<String>,
    },
    /// The runner explicitly reported that applying migrations failed.
    MigrationFailed {
        message: Option<String>,
        error: Option<Value>,
    },
    /// The runner could not be called or answered outside its contract.
    InvocationFailed {
        reason: String,
    },
}

impl GateOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, GateOutcome::Passed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            GateOutcome::Passed { .. } => "passed",
            GateOutcome::MigrationFailed { .. } => "migration_failed",
            GateOutcome::InvocationFailed { .. } => "invocation_failed",
        }
    }
}

impl std::fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateOutcome::Passed { message } => {
                write!(f, "Passed: {}", message.as_deref().unwrap_or("no message"))
            }
            GateOutcome::MigrationFailed { message, error } => {
                write!(
                    f,
                    "Migration failed: {}",
                    message.as_deref().unwrap_or("no message")
                )?;
                if let Some(error) = error {
                    write!(f, " (error: {})", error)?;
                }
                Ok(())
            }
            GateOutcome::InvocationFailed { reason } => write!(f, "Invocation failed: {}", reason),
        }
    }
}

/// 200 passes, 500 is a migration failure, and anything else fails the
/// invocation. Nothing ambiguous gets through the gate.
pub fn classify(result: &InvocationResult) -> GateOutcome {
    let outcome = match result.status_code {
        Some(STATUS_SUCCESS) => GateOutcome::Passed {
            message: result.message.clone(),
        },
        Some(STATUS_MIGRATION_FAILED) => GateOutcome::MigrationFailed {
            message: result.message.clone(),
            error: result.error.clone(),
        },
        Some(other) => {
            warn!(status_code = other, "Runner returned an unexpected status code");
            GateOutcome::InvocationFailed {
                reason: format!(
                    "Runner returned unexpected StatusCode {other}{}",
                    result
                        .message
                        .as_ref()
                        .map(|m| format!(": {m}"))
                        .unwrap_or_default()
                ),
            }
        }
        None => {
            warn!("Runner response carried no StatusCode");
            GateOutcome::InvocationFailed {
                reason: "Runner response carried no StatusCode".to_string(),
            }
        }
    };
    debug!(outcome = outcome.label(), "Classified runner result");
    outcome
}
