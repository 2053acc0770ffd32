//! IAM policy documents for the post-deploy step.
//!
//! Two documents are rendered per stage: the session policy sent along with
//! every AssumeRole request, which narrows the assumed session down to invoking
//! one runner, and the step role policy an operator attaches to whatever
//! executes the post-deploy step.

use iam_rs::{
    Arn, Decision, IAMAction, IAMEffect, IAMPolicy, IAMRequest, IAMResource, IAMStatement,
    IAMVersion, PolicyEvaluator, Principal, PrincipalId,
};
use tracing::{debug, error};

use crate::constants::{LAMBDA_INVOKE_ACTION, STS_ASSUME_ROLE_ACTION};
use crate::environment::InvocationTarget;
use crate::error::GateError;

/// Names used when checking that a policy reaches no further than its target.
const OUT_OF_SCOPE_FUNCTION: &str = "OutOfScopeFunction";
const OUT_OF_SCOPE_ROLE: &str = "OutOfScopeRole";
const OUT_OF_SCOPE_ACCOUNT: &str = "000000000000";

fn allow(sid: &str, action: &str, resource: &str) -> IAMStatement {
    IAMStatement::new(IAMEffect::Allow)
        .with_sid(sid)
        .with_action(IAMAction::Single(action.to_string()))
        .with_resource(IAMResource::Single(resource.to_string()))
}

/// Session policy for one elevation: invoke this runner and nothing else.
pub fn session_policy(target: &InvocationTarget) -> IAMPolicy {
    IAMPolicy::with_version(IAMVersion::V20121017).add_statement(allow(
        "InvokeMigrationRunner",
        LAMBDA_INVOKE_ACTION,
        target.function_arn(),
    ))
}

/// What the post-deploy step's own role needs to reach this target.
pub fn step_role_policy(target: &InvocationTarget) -> IAMPolicy {
    let policy = IAMPolicy::with_version(IAMVersion::V20121017).add_statement(allow(
        "InvokeMigrationRunner",
        LAMBDA_INVOKE_ACTION,
        target.function_arn(),
    ));
    match target.invoke_role_arn() {
        Some(role_arn) => {
            policy.add_statement(allow("AssumeInvokeRole", STS_ASSUME_ROLE_ACTION, role_arn))
        }
        None => policy,
    }
}

/// Evaluates one request against `policy` as the account that owns the target.
pub fn evaluate(
    policy: &IAMPolicy,
    target: &InvocationTarget,
    action: &str,
    resource: &str,
) -> Result<Decision, GateError> {
    let owner = Arn::parse(target.function_arn())?;
    let request = IAMRequest::new(
        Principal::Aws(PrincipalId::String(owner.account_id)),
        action,
        Arn::parse(resource)?,
    );
    let evaluator = PolicyEvaluator::with_policies(vec![policy.clone()]);
    let result = evaluator
        .evaluate(&request)
        .inspect_err(|e| error!(error = %e, "Error evaluating policy"))?;
    debug!(action = %action, resource = %resource, decision = %result.decision, "Evaluated policy");
    Ok(result.decision)
}

/// Requests that a policy scoped to `target` must never allow.
fn out_of_scope_requests(target: &InvocationTarget) -> Result<Vec<(String, String)>, GateError> {
    let function = Arn::parse(target.function_arn())?;
    let sibling_function = format!(
        "arn:{}:lambda:{}:{}:function:{}",
        function.partition, function.region, function.account_id, OUT_OF_SCOPE_FUNCTION
    );
    let foreign_function = format!(
        "arn:{}:lambda:{}:{}:{}",
        function.partition, function.region, OUT_OF_SCOPE_ACCOUNT, function.resource
    );
    let foreign_role = format!(
        "arn:{}:iam::{}:role/{}",
        function.partition, function.account_id, OUT_OF_SCOPE_ROLE
    );
    Ok(vec![
        (LAMBDA_INVOKE_ACTION.to_string(), sibling_function),
        (LAMBDA_INVOKE_ACTION.to_string(), foreign_function),
        ("lambda:UpdateFunctionCode".to_string(), target.function_arn().to_string()),
        ("lambda:DeleteFunction".to_string(), target.function_arn().to_string()),
        (STS_ASSUME_ROLE_ACTION.to_string(), foreign_role.clone()),
        ("iam:PassRole".to_string(), foreign_role),
    ])
}

/// Refuses a policy that cannot invoke `target`, or that allows anything past
/// the one runner and role of `target`.
pub fn ensure_scoped_to(policy: &IAMPolicy, target: &InvocationTarget) -> Result<(), GateError> {
    if evaluate(policy, target, LAMBDA_INVOKE_ACTION, target.function_arn())? != Decision::Allow {
        error!(function_arn = %target.function_arn(), "Policy does not allow invoking the runner");
        return Err(GateError::Configuration(format!(
            "Policy does not allow '{LAMBDA_INVOKE_ACTION}' on '{}'",
            target.function_arn()
        )));
    }
    for (action, resource) in out_of_scope_requests(target)? {
        if evaluate(policy, target, &action, &resource)? == Decision::Allow {
            error!(action = %action, resource = %resource, "Policy grants more than the migration target");
            return Err(GateError::Configuration(format!(
                "Policy allows '{action}' on '{resource}', expected only '{}'",
                target.function_arn()
            )));
        }
    }
    debug!(function_arn = %target.function_arn(), "Policy is scoped to a single target");
    Ok(())
}

/// Compact form, as sent with AssumeRole.
pub fn to_json(policy: &IAMPolicy) -> Result<String, GateError> {
    Ok(serde_json::to_string(policy)?)
}

pub fn to_json_pretty(policy: &IAMPolicy) -> Result<String, GateError> {
    Ok(serde_json::to_string_pretty(policy)?)
}
