//! mTLS connection to a runner pod.

use super::{RetryPolicy, RetryingRunnerClient, RunnerApi, RunnerDialer, RunnerError, RunnerTarget};
use crate::certs::NamespaceTls;
use crate::config::RunnerConfig;
use crate::constants::RUNNER_SUBDOMAIN;
use async_trait::async_trait;
use runner_proto::RunnerClient;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::{Certificate, ClientTlsConfig, Endpoint, Identity};
use tracing::debug;

/// DNS name the runner certificate is valid for
pub fn runner_hostname(
    config: &RunnerConfig,
    pod_ip: &str,
    namespace: &str,
    terraform_name: &str,
) -> String {
    if config.insecure_local_runner {
        return "localhost".to_string();
    }
    if config.use_pod_subdomain_resolution {
        return format!(
            "{}.{}.{}.svc.{}",
            terraform_name, RUNNER_SUBDOMAIN, namespace, config.cluster_domain
        );
    }
    format!(
        "{}.{}.pod.{}",
        pod_ip.replace('.', "-"),
        namespace,
        config.cluster_domain
    )
}

/// Dials runners over gRPC with the namespace TLS bundle as client identity
#[derive(Debug, Clone)]
pub struct TlsRunnerDialer {
    dial_timeout: Duration,
    max_message_size: usize,
    retry: RetryPolicy,
}

impl TlsRunnerDialer {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            dial_timeout: config.dial_timeout,
            max_message_size: config.max_message_size_bytes(),
            retry: RetryPolicy::default(),
        }
    }

    fn tls_config(target: &RunnerTarget, tls: &NamespaceTls) -> ClientTlsConfig {
        ClientTlsConfig::new()
            .identity(Identity::from_pem(&tls.cert_pem, &tls.key_pem))
            .ca_certificate(Certificate::from_pem(&tls.ca_cert_pem))
            .domain_name(target.host.clone())
    }
}

#[async_trait]
impl RunnerDialer for TlsRunnerDialer {
    async fn dial(
        &self,
        target: &RunnerTarget,
        tls: &NamespaceTls,
    ) -> Result<Arc<dyn RunnerApi>, RunnerError> {
        let dial_err = |reason: String| RunnerError::Dial {
            host: target.host.clone(),
            reason,
        };
        let address = format!("https://{}:{}", target.host, target.port);
        debug!("Dialing runner at {}", address);

        let endpoint = Endpoint::from_shared(address)
            .map_err(|e| dial_err(e.to_string()))?
            .tls_config(Self::tls_config(target, tls))
            .map_err(|e| dial_err(e.to_string()))?
            .connect_timeout(self.dial_timeout);

        // Block until the channel is ready or the dial deadline passes
        let channel = tokio::time::timeout(self.dial_timeout, endpoint.connect())
            .await
            .map_err(|_| dial_err(format!("timed out after {:?}", self.dial_timeout)))?
            .map_err(|e| dial_err(e.to_string()))?;

        let client = RunnerClient::new(channel)
            .max_decoding_message_size(self.max_message_size)
            .max_encoding_message_size(self.max_message_size);
        Ok(Arc::new(RetryingRunnerClient::new(client, self.retry.clone())))
    }
}
