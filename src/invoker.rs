//! Invoking the remote migration runner.

use std::future::Future;

use aws_sdk_lambda::config::{Credentials, Region};
use aws_sdk_lambda::types::{InvocationType, LogType};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::credentials::CredentialSet;
use crate::environment::InvocationTarget;
use crate::error::GateError;

/// Raw outcome of one runner call, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct InvocationResult {
    pub status_code: Option<i64>,
    pub message: Option<String>,
    pub error: Option<Value>,
    /// Tail of the runner's execution log, when the transport returned one.
    pub raw_log: Option<String>,
}

impl InvocationResult {
    /// Parses the runner's `{ "StatusCode", "Message", "Error" }` body.
    ///
    /// A body that isn't a JSON object is a contract violation and fails here.
    /// A non-integer or missing `StatusCode` is kept as `None` and left to the
    /// classifier.
    pub fn from_payload(payload: &[u8], raw_log: Option<String>) -> Result<Self, GateError> {
        let body: Value = serde_json::from_slice(payload).map_err(|err| {
            GateError::Invocation(format!("Runner returned a body that is not JSON: {err}"))
        })?;
        let Value::Object(mut fields) = body else {
            return Err(GateError::Invocation(format!(
                "Runner returned a JSON {} instead of an object",
                json_kind(&body)
            )));
        };

        let status_code = fields.get("StatusCode").and_then(Value::as_i64);
        let message = match fields.remove("Message") {
            None | Some(Value::Null) => None,
            Some(Value::String(message)) => Some(message),
            Some(other) => Some(other.to_string()),
        };
        let error = match fields.remove("Error") {
            None | Some(Value::Null) => None,
            Some(error) => Some(error),
        };
        Ok(Self {
            status_code,
            message,
            error,
            raw_log,
        })
    }

    /// Checks what the transport handed back before parsing the body.
    ///
    /// A runner that crashed (`function_error` set) or answered with nothing
    /// never produced a result, so both are invocation failures.
    pub fn from_response(
        function_name: &str,
        function_error: Option<&str>,
        payload: &[u8],
        raw_log: Option<String>,
    ) -> Result<Self, GateError> {
        if let Some(function_error) = function_error {
            let detail = String::from_utf8_lossy(payload);
            return Err(GateError::Invocation(format!(
                "{function_name} failed before returning a result ({function_error}): {detail}"
            )));
        }
        if payload.is_empty() {
            return Err(GateError::Invocation(format!(
                "{function_name} returned an empty payload"
            )));
        }
        Self::from_payload(payload, raw_log)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The log tail comes back base64 encoded.
pub fn decode_log_tail(encoded: &str) -> Option<String> {
    match STANDARD.decode(encoded.trim()) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) => {
            warn!(error = %err, "Runner log tail is not valid base64, ignoring it");
            None
        }
    }
}

pub trait MigrationInvoker {
    /// Calls the runner once. The credentials, if any, are consumed by the call.
    fn invoke(
        &self,
        target: &InvocationTarget,
        credentials: Option<CredentialSet>,
    ) -> impl Future<Output = Result<InvocationResult, GateError>> + Send;
}

/// [MigrationInvoker] that calls the runner as an AWS Lambda function.
pub struct LambdaInvoker {
    sdk_config: aws_config::SdkConfig,
}

impl LambdaInvoker {
    pub fn new(sdk_config: aws_config::SdkConfig) -> Self {
        Self { sdk_config }
    }

    fn client_for(
        &self,
        target: &InvocationTarget,
        credentials: Option<CredentialSet>,
    ) -> aws_sdk_lambda::Client {
        let mut builder = aws_sdk_lambda::config::Builder::from(&self.sdk_config)
            .region(Region::new(target.region().to_string()));
        if let Some(credentials) = credentials {
            builder = builder.credentials_provider(Credentials::new(
                credentials.access_key_id.clone(),
                credentials.secret_access_key.value().to_string(),
                Some(credentials.session_token.value().to_string()),
                Some(credentials.expiry_as_system_time()),
                "migration-gate",
            ));
        }
        aws_sdk_lambda::Client::from_conf(builder.build())
    }
}

impl MigrationInvoker for LambdaInvoker {
    #[instrument(level = "debug", skip_all, fields(function = %target.function_name()))]
    async fn invoke(
        &self,
        target: &InvocationTarget,
        credentials: Option<CredentialSet>,
    ) -> Result<InvocationResult, GateError> {
        let elevated = credentials.is_some();
        let client = self.client_for(target, credentials);
        info!(
            function_arn = %target.function_arn(),
            elevated,
            "Invoking migration runner"
        );

        let output = client
            .invoke()
            .function_name(target.function_arn())
            .invocation_type(InvocationType::RequestResponse)
            .log_type(LogType::Tail)
            .send()
            .await
            .map_err(|err| {
                GateError::Invocation(format!(
                    "Failed to invoke {}: {}",
                    target.function_name(),
                    aws_sdk_lambda::error::DisplayErrorContext(&err)
                ))
            })?;

        let raw_log = output.log_result().and_then(decode_log_tail);
        if let Some(log) = &raw_log {
            for line in log.lines().filter(|line| !line.trim().is_empty()) {
                info!(target: "migration_gate::runner", "{}", line);
            }
        }

        debug!(status_code = output.status_code(), "Transport returned");
        let payload: &[u8] = output.payload().map(|blob| blob.as_ref()).unwrap_or_default();
        InvocationResult::from_response(
            target.function_name(),
            output.function_error(),
            payload,
            raw_log,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_success_body() {
        let result = InvocationResult::from_payload(
            br#"{"StatusCode":200,"Message":"Successfully run migration command"}"#,
            None,
        )
        .expect("Failed to parse body");
        assert_eq!(result.status_code, Some(200));
        assert_eq!(
            result.message.as_deref(),
            Some("Successfully run migration command")
        );
        assert_eq!(result.error, None);
    }

    #[test]
    fn test_parses_failure_body_with_error() {
        let result = InvocationResult::from_payload(
            br#"{"StatusCode":500,"Message":"Could not run migration command.","Error":{"code":"42P07","detail":"relation exists"}}"#,
            Some("START RequestId".to_string()),
        )
        .expect("Failed to parse body");
        assert_eq!(result.status_code, Some(500));
        assert_eq!(
            result.error,
            Some(serde_json::json!({"code": "42P07", "detail": "relation exists"}))
        );
        assert_eq!(result.raw_log.as_deref(), Some("START RequestId"));
    }

    #[test]
    fn test_missing_or_odd_status_code_is_kept_as_none() {
        let result =
            InvocationResult::from_payload(br#"{"Message":"hi"}"#, None).expect("parse");
        assert_eq!(result.status_code, None);

        let result =
            InvocationResult::from_payload(br#"{"StatusCode":"200"}"#, None).expect("parse");
        assert_eq!(result.status_code, None);
    }

    #[test]
    fn test_non_object_body_is_an_invocation_error() {
        assert!(matches!(
            InvocationResult::from_payload(b"null", None),
            Err(GateError::Invocation(_))
        ));
        assert!(matches!(
            InvocationResult::from_payload(b"<html>502</html>", None),
            Err(GateError::Invocation(_))
        ));
        assert!(matches!(
            InvocationResult::from_payload(b"[200]", None),
            Err(GateError::Invocation(_))
        ));
    }

    #[test]
    fn test_function_error_is_an_invocation_error() {
        let err = InvocationResult::from_response(
            "RDSSchemaMigrationFunction-dev",
            Some("Unhandled"),
            br#"{"errorMessage":"Task timed out after 600.00 seconds"}"#,
            None,
        )
        .expect_err("A crashed runner must not produce a result");
        match err {
            GateError::Invocation(message) => {
                assert!(message.contains("RDSSchemaMigrationFunction-dev"));
                assert!(message.contains("Unhandled"));
                assert!(message.contains("Task timed out"));
            }
            other => panic!("Unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_function_error_wins_over_a_valid_body() {
        assert!(matches!(
            InvocationResult::from_response(
                "runner",
                Some("Handled"),
                br#"{"StatusCode":200}"#,
                None
            ),
            Err(GateError::Invocation(_))
        ));
    }

    #[test]
    fn test_empty_payload_is_an_invocation_error() {
        let err = InvocationResult::from_response("runner", None, b"", None)
            .expect_err("An empty payload must not produce a result");
        assert!(err.to_string().contains("empty payload"));
    }

    #[test]
    fn test_response_with_body_is_parsed() {
        let result = InvocationResult::from_response(
            "runner",
            None,
            br#"{"StatusCode":500,"Message":"Could not run migration command."}"#,
            Some("END RequestId".to_string()),
        )
        .expect("Failed to parse response");
        assert_eq!(result.status_code, Some(500));
        assert_eq!(result.raw_log.as_deref(), Some("END RequestId"));
    }

    #[test]
    fn test_decode_log_tail() {
        let encoded = STANDARD.encode("START RequestId: abc\nEND RequestId: abc\n");
        assert_eq!(
            decode_log_tail(&encoded).as_deref(),
            Some("START RequestId: abc\nEND RequestId: abc\n")
        );
        assert_eq!(decode_log_tail("%%%not-base64"), None);
    }
}
