//! # Controller Settings
//!
//! Reconciler, runner orchestration and certificate rotation settings.

use super::{env_flag, env_var_or_default};
use crate::constants::*;
use std::time::Duration;

/// Runner pod orchestration settings
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Default runner image when the resource does not set one
    pub image: String,
    pub grpc_port: u16,
    /// Maximum gRPC message size in MiB
    pub grpc_max_message_size_mb: usize,
    /// Upper bound on termination and IP waits
    pub creation_timeout: Duration,
    /// Poll interval while waiting for a terminating pod to disappear
    pub termination_poll_interval: Duration,
    /// Poll interval while waiting for a pod IP
    pub ip_poll_interval: Duration,
    pub dial_timeout: Duration,
    pub cleanup_poll_interval: Duration,
    pub cleanup_timeout: Duration,
    pub cluster_domain: String,
    /// Address runners as `{name}.tf-runner.{ns}.svc.{domain}` instead of the pod IP name
    pub use_pod_subdomain_resolution: bool,
    /// Skip pod management and dial a runner on localhost
    pub insecure_local_runner: bool,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

impl RunnerConfig {
    pub fn max_message_size_bytes(&self) -> usize {
        self.grpc_max_message_size_mb * 1024 * 1024
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_RUNNER_IMAGE.to_string(),
            grpc_port: DEFAULT_RUNNER_GRPC_PORT,
            grpc_max_message_size_mb: DEFAULT_RUNNER_GRPC_MAX_MESSAGE_SIZE_MB,
            creation_timeout: Duration::from_secs(DEFAULT_RUNNER_CREATION_TIMEOUT_SECS),
            termination_poll_interval: Duration::from_secs(DEFAULT_RUNNER_POLL_INTERVAL_SECS),
            ip_poll_interval: Duration::from_millis(DEFAULT_RUNNER_IP_POLL_INTERVAL_MS),
            dial_timeout: Duration::from_secs(DEFAULT_RUNNER_DIAL_TIMEOUT_SECS),
            cleanup_poll_interval: Duration::from_secs(DEFAULT_RUNNER_CLEANUP_POLL_INTERVAL_SECS),
            cleanup_timeout: Duration::from_secs(DEFAULT_RUNNER_CLEANUP_TIMEOUT_SECS),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            use_pod_subdomain_resolution: false,
            insecure_local_runner: false,
            http_proxy: None,
            https_proxy: None,
            no_proxy: None,
        }
    }
}

/// CA rotation settings
#[derive(Debug, Clone)]
pub struct CertRotationConfig {
    pub ca_validity: Duration,
    /// How often the rotator checks CA validity and collects expired secrets
    pub rotation_check_frequency: Duration,
    /// A CA expiring within this window counts as invalid
    pub lookahead: Duration,
}

impl Default for CertRotationConfig {
    fn default() -> Self {
        Self {
            ca_validity: Duration::from_secs(DEFAULT_CERT_VALIDITY_SECS),
            rotation_check_frequency: Duration::from_secs(DEFAULT_CERT_ROTATION_CHECK_SECS),
            lookahead: Duration::from_secs(DEFAULT_CERT_LOOKAHEAD_SECS),
        }
    }
}

/// Controller configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub runner: RunnerConfig,
    pub certs: CertRotationConfig,
    /// Reject source and dependency references that leave the resource namespace
    pub no_cross_namespace_refs: bool,
    /// Fixed requeue used while a dependency is not ready
    pub dependency_requeue_interval: Duration,
    /// Bound on how long shutdown waits for in-flight passes
    pub shutdown_timeout: Duration,
    /// Maximum number of concurrent reconcile passes
    pub concurrent_reconciles: u16,
    /// Replaces scheme and host of artifact URLs for local development
    pub source_controller_localhost: Option<String>,
    pub disable_webhook_tls_verify: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            runner: RunnerConfig::default(),
            certs: CertRotationConfig::default(),
            no_cross_namespace_refs: false,
            dependency_requeue_interval: Duration::from_secs(
                DEFAULT_DEPENDENCY_REQUEUE_INTERVAL_SECS,
            ),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            concurrent_reconciles: DEFAULT_CONCURRENT_RECONCILES,
            source_controller_localhost: None,
            disable_webhook_tls_verify: false,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let runner = RunnerConfig {
            image: env_var_or_default("RUNNER_POD_IMAGE", DEFAULT_RUNNER_IMAGE.to_string()),
            grpc_port: env_var_or_default("RUNNER_GRPC_PORT", DEFAULT_RUNNER_GRPC_PORT),
            grpc_max_message_size_mb: env_var_or_default(
                "RUNNER_GRPC_MAX_MESSAGE_SIZE",
                DEFAULT_RUNNER_GRPC_MAX_MESSAGE_SIZE_MB,
            ),
            creation_timeout: Duration::from_secs(env_var_or_default(
                "RUNNER_CREATION_TIMEOUT_SECS",
                DEFAULT_RUNNER_CREATION_TIMEOUT_SECS,
            )),
            termination_poll_interval: Duration::from_secs(env_var_or_default(
                "RUNNER_POLL_INTERVAL_SECS",
                DEFAULT_RUNNER_POLL_INTERVAL_SECS,
            )),
            ip_poll_interval: Duration::from_millis(env_var_or_default(
                "RUNNER_IP_POLL_INTERVAL_MS",
                DEFAULT_RUNNER_IP_POLL_INTERVAL_MS,
            )),
            dial_timeout: Duration::from_secs(env_var_or_default(
                "RUNNER_DIAL_TIMEOUT_SECS",
                DEFAULT_RUNNER_DIAL_TIMEOUT_SECS,
            )),
            cleanup_poll_interval: Duration::from_secs(env_var_or_default(
                "RUNNER_CLEANUP_POLL_INTERVAL_SECS",
                DEFAULT_RUNNER_CLEANUP_POLL_INTERVAL_SECS,
            )),
            cleanup_timeout: Duration::from_secs(env_var_or_default(
                "RUNNER_CLEANUP_TIMEOUT_SECS",
                DEFAULT_RUNNER_CLEANUP_TIMEOUT_SECS,
            )),
            cluster_domain: env_var_or_default("CLUSTER_DOMAIN", DEFAULT_CLUSTER_DOMAIN.to_string()),
            use_pod_subdomain_resolution: env_flag("USE_POD_SUBDOMAIN_RESOLUTION"),
            insecure_local_runner: env_flag("INSECURE_LOCAL_RUNNER"),
            http_proxy: std::env::var("HTTP_PROXY").ok(),
            https_proxy: std::env::var("HTTPS_PROXY").ok(),
            no_proxy: std::env::var("NO_PROXY").ok(),
        };

        let certs = CertRotationConfig {
            ca_validity: Duration::from_secs(env_var_or_default(
                "CERT_VALIDITY_SECS",
                DEFAULT_CERT_VALIDITY_SECS,
            )),
            rotation_check_frequency: Duration::from_secs(env_var_or_default(
                "CERT_ROTATION_CHECK_SECS",
                DEFAULT_CERT_ROTATION_CHECK_SECS,
            )),
            lookahead: Duration::from_secs(env_var_or_default(
                "CERT_LOOKAHEAD_SECS",
                DEFAULT_CERT_LOOKAHEAD_SECS,
            )),
        };

        Self {
            runner,
            certs,
            no_cross_namespace_refs: env_flag("NO_CROSS_NAMESPACE_REFS"),
            dependency_requeue_interval: Duration::from_secs(env_var_or_default(
                "DEPENDENCY_REQUEUE_INTERVAL_SECS",
                DEFAULT_DEPENDENCY_REQUEUE_INTERVAL_SECS,
            )),
            shutdown_timeout: Duration::from_secs(env_var_or_default(
                "SHUTDOWN_TIMEOUT_SECS",
                DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            )),
            concurrent_reconciles: env_var_or_default(
                "CONCURRENT_RECONCILES",
                DEFAULT_CONCURRENT_RECONCILES,
            ),
            source_controller_localhost: std::env::var("SOURCE_CONTROLLER_LOCALHOST")
                .ok()
                .filter(|v| !v.is_empty()),
            disable_webhook_tls_verify: env_flag("DISABLE_WEBHOOK_TLS_VERIFY"),
        }
    }
}
