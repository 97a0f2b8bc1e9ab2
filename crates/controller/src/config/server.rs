//! # Health Server Configuration
//!
//! Where `/metrics`, `/healthz` and `/readyz` are served, and how long startup
//! waits for the listener.

use super::env_var_or_default;
use crate::constants::{
    DEFAULT_METRICS_PORT, DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub metrics_port: u16,
    /// Startup fails when the listener is not bound within this window
    pub startup_timeout: Duration,
    pub ready_poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            metrics_port: DEFAULT_METRICS_PORT,
            startup_timeout: Duration::from_secs(DEFAULT_SERVER_STARTUP_TIMEOUT_SECS),
            ready_poll_interval: Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: env_var_or_default("METRICS_BIND_ADDRESS", defaults.bind_address),
            metrics_port: env_var_or_default("METRICS_PORT", defaults.metrics_port),
            startup_timeout: Duration::from_secs(env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            )),
            ready_poll_interval: defaults.ready_poll_interval,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.metrics_port)
    }
}
