use std::sync::LazyLock;
use std::time::Duration;

/// Environment variable the post-deploy step reads the runner's function name from.
pub const FUNCTION_NAME_ENV: &str = "DB_MIGRATE_FUNCTION_NAME";

pub const DEFAULT_PIPELINE_NAME: &str = "RDSSchemaMigrationDemo";
pub const DEFAULT_FUNCTION_NAME_PREFIX: &str = "RDSSchemaMigrationFunction";
pub const DEFAULT_INVOKE_ROLE_NAME: &str = "CrossAccountLambdaInvokeRole";
pub const DEFAULT_SESSION_NAME: &str = "CrossAccountSession";
pub const DEFAULT_APPROVAL_COMMENT: &str = "Approve deployment to production";

/// Stage names that always get a manual approval gate.
pub const PRODUCTION_STAGE_NAMES: [&str; 3] = ["prod", "prd", "production"];

pub const LAMBDA_INVOKE_ACTION: &str = "lambda:InvokeFunction";
pub const STS_ASSUME_ROLE_ACTION: &str = "sts:AssumeRole";

/// STS refuses sessions shorter than 15 minutes or longer than 12 hours.
pub const MIN_SESSION_DURATION_SECS: u64 = 900;
pub const MAX_SESSION_DURATION_SECS: u64 = 43_200;

pub(crate) static DEFAULT_AUTHENTICATION_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(30));

/// The runner has a ten minute budget, the step gets some headroom on top.
pub(crate) static DEFAULT_INVOCATION_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(900));

/// Runner status codes.
pub const STATUS_SUCCESS: i64 = 200;
pub const STATUS_MIGRATION_FAILED: i64 = 500;

pub const EXIT_PASSED: u8 = 0;
/// The runner answered 500.
pub const EXIT_MIGRATION_FAILED: u8 = 1;
/// Transport failure, timeout, or a reply outside the runner's contract.
pub const EXIT_INVOCATION_FAILED: u8 = 2;
pub const EXIT_AUTHENTICATION_FAILED: u8 = 3;
/// Deployment failed or the approval was rejected.
pub const EXIT_DEPLOYMENT_FAILED: u8 = 4;
/// Exit status when the pipeline definition or environment is unusable.
pub const EXIT_CONFIGURATION_ERROR: u8 = 5;
/// Exit status when the operator interrupts a run.
pub const EXIT_ABORTED: u8 = 130;
