//! # Constants
//!
//! Default values and well-known names shared across the controller.

// Resource identity
pub const API_GROUP: &str = "infra.contrib.fluxcd.io";
pub const FIELD_MANAGER: &str = "tf-controller";

/// Finalizer held by every Terraform resource until it has been finalized
pub const TERRAFORM_FINALIZER: &str = "finalizers.tf.contrib.fluxcd.io";

/// Prefix of the finalizer a dependent places on each of its dependencies
pub const DEPENDENCY_FINALIZER_PREFIX: &str = "tf.dependency.of.";

/// Label carried by runner pods and runner TLS secrets
pub const RUNNER_LABEL: &str = "infra.contrib.fluxcd.io/terraform";

/// Label binding a runner pod to the TLS secret it was created with
pub const RUNNER_TLS_SECRET_LABEL: &str = "tf.weave.works/tls-secret-name";

pub const RUNNER_TLS_SECRET_BASE_NAME: &str = "terraform-runner.tls";
pub const RUNNER_POD_NAME_SUFFIX: &str = "-tf-runner";
pub const RUNNER_SUBDOMAIN: &str = "tf-runner";
pub const RUNNER_CONTAINER_NAME: &str = "tf-runner";
pub const DEFAULT_RUNNER_SERVICE_ACCOUNT: &str = "tf-runner";
pub const DEFAULT_RUNNER_IMAGE: &str = "ghcr.io/flux-iac/tf-runner:latest";
pub const RUNNER_USER_ID: i64 = 65532;

/// Annotation used by tfctl and flux to request an immediate reconcile
pub const RECONCILE_REQUEST_ANNOTATION: &str = "reconcile.fluxcd.io/requestedAt";

// Plan handling
pub const APPROVE_PLAN_AUTO: &str = "auto";
pub const APPROVE_PLAN_DISABLE: &str = "disable";
pub const REPLAN_PREFIX: &str = "replan";
pub const TF_PLAN_FILENAME: &str = "tfplan";
pub const TF_DRIFT_FILENAME: &str = "tfdrift";
pub const DEFAULT_WORKSPACE: &str = "default";

/// Conditions messages longer than this are truncated with `...`
pub const MAX_CONDITION_MESSAGE_LENGTH: usize = 20_000;

// Reconcile timing defaults
pub const DEFAULT_INTERVAL: &str = "1m";
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_MAX_RETRY_INTERVAL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_DEPENDENCY_REQUEUE_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_RUNNER_TERMINATION_GRACE_PERIOD_SECS: i64 = 30;

// Runner orchestration defaults
pub const DEFAULT_RUNNER_GRPC_PORT: u16 = 30000;
pub const DEFAULT_RUNNER_GRPC_MAX_MESSAGE_SIZE_MB: usize = 4;
pub const DEFAULT_RUNNER_CREATION_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_RUNNER_POLL_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_RUNNER_IP_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_RUNNER_DIAL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RUNNER_CLEANUP_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_RUNNER_CLEANUP_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

// Runner RPC retry policy
pub const RUNNER_RPC_MAX_ATTEMPTS: u32 = 4;
pub const RUNNER_RPC_BACKOFF_MS: u64 = 10;

// Certificate rotation defaults
pub const DEFAULT_CERT_VALIDITY_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_CERT_ROTATION_CHECK_SECS: u64 = 30 * 60;
pub const DEFAULT_CERT_LOOKAHEAD_SECS: u64 = 6 * 60 * 60;

// Artifact download
pub const ARTIFACT_DOWNLOAD_TIMEOUT_SECS: u64 = 60;

// Process-level defaults
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONCURRENT_RECONCILES: u16 = 4;
pub const DEFAULT_METRICS_PORT: u16 = 8080;
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Watch timeout must stay below the client read timeout (30s)
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Base directory holding webhook client certificates, one folder per host
pub const WEBHOOK_CERTS_DIR: &str = "/etc/certs";

pub const DEFAULT_HEALTH_CHECK_TIMEOUT_SECS: u64 = 20;

/// Environment variable pointing Terraform at the CLI configuration file
pub const TF_CLI_CONFIG_FILE_ENV: &str = "TF_CLI_CONFIG_FILE";
