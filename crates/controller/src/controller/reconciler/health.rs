//! Health checks against infrastructure provisioned by an apply.
//!
//! Addresses and URLs are rendered with `${{ .key }}` over the outputs
//! written to the outputs secret. A TCP check passes once a connection is
//! established; an HTTP check passes on any status below 400.

use super::types::{Pass, ReconcilerError};
use crate::constants::DEFAULT_HEALTH_CHECK_TIMEOUT_SECS;
use crate::controller::webhooks::render_template;
use crate::crd::{HealthCheck, HealthCheckType, Outcome};
use crate::policy::parse_duration;
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum HealthCheckError {
    #[error("error getting terraform output for health checks: {0}")]
    Template(String),

    #[error("invalid timeout {timeout:?} for health check {name}")]
    Timeout { name: String, timeout: String },

    #[error("invalid address for tcp health check: {address}, {reason}")]
    Address { address: String, reason: String },

    #[error("failed to perform tcp health check for {name} on {address}: {reason}")]
    Tcp {
        name: String,
        address: String,
        reason: String,
    },

    #[error("invalid url for http health check: {url}, {reason}")]
    Url { url: String, reason: String },

    #[error("failed to perform http health check for {name} on {url}: {reason}")]
    Http {
        name: String,
        url: String,
        reason: String,
    },

    #[error("failed to perform http health check for {name} on {url}, response body: {body}")]
    HttpStatus {
        name: String,
        url: String,
        body: String,
    },
}

/// Runs the configured checks and records the HealthCheck condition
pub(super) async fn check(
    pass: &mut Pass<'_>,
    outputs: &BTreeMap<String, String>,
) -> Result<(), ReconcilerError> {
    info!("Running health checks");
    let checks = pass.terraform.spec.health_checks.clone();
    match run_health_checks(&checks, outputs).await {
        Ok(()) => {
            pass.record_and_persist(Outcome::HealthChecksSucceeded {
                msg: "Health checks succeeded".to_string(),
            })
            .await
        }
        Err(e) => {
            error!(error = %e, "Health check failed");
            let msg = e.to_string();
            pass.record_and_persist(Outcome::HealthChecksFailed { msg: msg.clone() })
                .await?;
            Err(ReconcilerError::ExecutionFailed(msg))
        }
    }
}

/// Runs every check in order and stops at the first failure
pub async fn run_health_checks(
    checks: &[HealthCheck],
    outputs: &BTreeMap<String, String>,
) -> Result<(), HealthCheckError> {
    let data = Value::Object(
        outputs
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    );
    for check in checks {
        let timeout = check_timeout(check)?;
        match check.check_type {
            HealthCheckType::Tcp => {
                let address = render_template(&check.address, &data).map_err(HealthCheckError::Template)?;
                tcp_check(&check.name, &address, timeout).await?;
            }
            HealthCheckType::HttpGet => {
                let url = render_template(&check.url, &data).map_err(HealthCheckError::Template)?;
                http_check(&check.name, &url, timeout).await?;
            }
        }
        info!(health_check = %check.name, "Health check passed");
    }
    Ok(())
}

fn check_timeout(check: &HealthCheck) -> Result<Duration, HealthCheckError> {
    match check.timeout.as_deref() {
        None => Ok(Duration::from_secs(DEFAULT_HEALTH_CHECK_TIMEOUT_SECS)),
        Some(timeout) => parse_duration(timeout).map_err(|_| HealthCheckError::Timeout {
            name: check.name.clone(),
            timeout: timeout.to_string(),
        }),
    }
}

/// A DNS label per RFC 952 as relaxed by RFC 1123
fn is_valid_label(label: &str) -> bool {
    (1..=63).contains(&label.len())
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_alphanumeric() || c == '-')
}

/// Checks `host:port` without resolving it. Schemes are rejected.
pub fn validate_tcp_address(address: &str) -> Result<(), String> {
    if address.contains("://") {
        return Err("URL schemas are not allowed".to_string());
    }
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| format!("address {address}: missing port in address"))?;
    let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        Some(bracketed) => bracketed,
        None if host.contains(':') => return Err(format!("address {address}: too many colons in address")),
        None => host,
    };

    if host.parse::<IpAddr>().is_err() && !host.split('.').all(is_valid_label) {
        return Err("invalid host format".to_string());
    }
    match port.parse::<u32>() {
        Ok(port) if (1..=65535).contains(&port) => Ok(()),
        _ => Err("invalid port number".to_string()),
    }
}

async fn tcp_check(name: &str, address: &str, timeout: Duration) -> Result<(), HealthCheckError> {
    validate_tcp_address(address).map_err(|reason| HealthCheckError::Address {
        address: address.to_string(),
        reason,
    })?;
    let tcp_error = |reason: String| HealthCheckError::Tcp {
        name: name.to_string(),
        address: address.to_string(),
        reason,
    };
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_stream)) => {
            debug!(address, "TCP health check connected");
            Ok(())
        }
        Ok(Err(e)) => Err(tcp_error(e.to_string())),
        Err(_) => Err(tcp_error(format!("timed out after {timeout:?}"))),
    }
}

async fn http_check(name: &str, url: &str, timeout: Duration) -> Result<(), HealthCheckError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| HealthCheckError::Url {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let http_error = |reason: String| HealthCheckError::Http {
        name: name.to_string(),
        url: url.to_string(),
        reason,
    };
    let client = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(timeout)
        .build()
        .map_err(|e| http_error(e.to_string()))?;
    let response = client
        .get(parsed)
        .send()
        .await
        .map_err(|e| http_error(e.to_string()))?;

    let status = response.status();
    let body = response.text().await.map_err(|e| {
        http_error(format!("error reading body: {e}"))
    })?;
    if status.is_success() || status.is_redirection() {
        debug!(url, code = status.as_u16(), "HTTP health check succeeded");
        return Ok(());
    }
    Err(HealthCheckError::HttpStatus {
        name: name.to_string(),
        url: url.to_string(),
        body,
    })
}
