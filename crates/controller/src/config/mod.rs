//! # Controller Configuration
//!
//! Controller-level configuration loaded from environment variables.
//!
//! All configuration has sensible defaults and can be overridden via environment variables.
//! Environment variables are populated from a ConfigMap using `envFrom` in the deployment.

mod controller;
mod server;

pub use controller::{CertRotationConfig, ControllerConfig, RunnerConfig};
pub use server::ServerConfig;

use std::sync::Arc;

/// Controller configuration shared by every reconcile pass
pub type SharedControllerConfig = Arc<ControllerConfig>;

/// Load configuration from environment variables with defaults
pub fn load_config() -> (ControllerConfig, ServerConfig) {
    (ControllerConfig::from_env(), ServerConfig::from_env())
}

/// Read environment variable or return default value
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Boolean flags follow the runner convention: only `"1"` or `"true"` enables them
pub(crate) fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).as_deref().map(str::trim),
        Ok("1") | Ok("true") | Ok("TRUE")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_or_default_falls_back_on_garbage() {
        std::env::set_var("TF_CONTROLLER_TEST_PORT", "not-a-number");
        let port: u16 = env_var_or_default("TF_CONTROLLER_TEST_PORT", 42);
        assert_eq!(port, 42);
        std::env::remove_var("TF_CONTROLLER_TEST_PORT");
    }

    #[test]
    fn test_env_flag() {
        std::env::set_var("TF_CONTROLLER_TEST_FLAG", "1");
        assert!(env_flag("TF_CONTROLLER_TEST_FLAG"));
        std::env::set_var("TF_CONTROLLER_TEST_FLAG", "0");
        assert!(!env_flag("TF_CONTROLLER_TEST_FLAG"));
        std::env::remove_var("TF_CONTROLLER_TEST_FLAG");
        assert!(!env_flag("TF_CONTROLLER_TEST_FLAG"));
    }
}
