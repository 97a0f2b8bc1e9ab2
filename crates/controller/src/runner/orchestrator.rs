//! Runner provisioning protocol.

use super::pod::termination_grace_period;
use super::{
    classify_pod, pod_ip, poll_until, runner_hostname, runner_pod, runner_pod_name, PodState,
    PollError, RunnerApi, RunnerDialer, RunnerError, RunnerTarget,
};
use crate::certs::{CertRotatorHandle, NamespaceTls};
use crate::cluster::{ClusterClient, ClusterError};
use crate::config::RunnerConfig;
use crate::crd::Terraform;
use crate::observability::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Grace period used when force-killing a runner pod
const FORCE_KILL_GRACE_PERIOD_SECS: i64 = 1;

/// Provisions runner pods and opens authenticated sessions to them
pub struct RunnerOrchestrator {
    cluster: Arc<dyn ClusterClient>,
    certs: CertRotatorHandle,
    dialer: Arc<dyn RunnerDialer>,
    config: RunnerConfig,
}

impl std::fmt::Debug for RunnerOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RunnerOrchestrator {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        certs: CertRotatorHandle,
        dialer: Arc<dyn RunnerDialer>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            cluster,
            certs,
            dialer,
            config,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Waits for the rotator and rotates the CA when it is no longer valid
    pub async fn ensure_certificates(&self) -> Result<(), RunnerError> {
        self.certs.wait_ready().await?;
        if !self.certs.is_ca_valid() {
            info!("Runner CA is not valid, requesting rotation");
            self.certs.rotate_ca().await?;
        }
        Ok(())
    }

    /// Ensures a runner for `terraform` exists and returns a session to it
    pub async fn acquire(
        &self,
        terraform: &Terraform,
        revision: &str,
        cancel: &CancellationToken,
    ) -> Result<RunnerSession, RunnerError> {
        self.ensure_certificates().await?;

        let namespace = terraform.runner_namespace();
        let tls = self.certs.namespace_tls(namespace).await?;
        self.ensure_tls_secret(&tls).await?;

        let (host, pod) = if self.config.insecure_local_runner {
            debug!("Using local runner");
            (runner_hostname(&self.config, "", namespace, terraform.name()), None)
        } else {
            let ip = self
                .ensure_pod(terraform, &tls.secret_name, revision, cancel)
                .await?;
            (
                runner_hostname(&self.config, &ip, namespace, terraform.name()),
                Some(RunnerPodRef {
                    namespace: namespace.to_string(),
                    name: runner_pod_name(terraform.name()),
                }),
            )
        };

        let target = RunnerTarget {
            host,
            port: self.config.grpc_port,
        };
        let client = match self.dialer.dial(&target, &tls).await {
            Ok(client) => client,
            Err(e) => {
                error!(host = %target.host, error = %e, "Failed to connect to runner");
                return Err(e);
            }
        };

        Ok(RunnerSession {
            client,
            pod,
            cluster: Arc::clone(&self.cluster),
            cleanup_poll_interval: self.config.cleanup_poll_interval,
            cleanup_timeout: self.config.cleanup_timeout,
        })
    }

    async fn ensure_tls_secret(&self, tls: &NamespaceTls) -> Result<(), RunnerError> {
        if self
            .cluster
            .get_secret(&tls.namespace, &tls.secret_name)
            .await?
            .is_some()
        {
            return Ok(());
        }
        match self.cluster.create_secret(&tls.to_secret()).await {
            Ok(()) => {
                info!(namespace = %tls.namespace, secret = %tls.secret_name, "Created runner TLS secret");
                Ok(())
            }
            Err(ClusterError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Runs the pod state machine and returns the pod IP
    async fn ensure_pod(
        &self,
        terraform: &Terraform,
        tls_secret_name: &str,
        revision: &str,
        cancel: &CancellationToken,
    ) -> Result<String, RunnerError> {
        let namespace = terraform.runner_namespace();
        let pod_name = runner_pod_name(terraform.name());
        // Templating first so a bad revision never deletes a working pod
        let desired = runner_pod(terraform, &self.config, tls_secret_name, revision)?;

        let live = self.cluster.get_pod(namespace, &pod_name).await?;
        let state = classify_pod(live.as_ref(), tls_secret_name, termination_grace_period(terraform));
        info!(pod = %pod_name, state = ?state, "Runner pod state");

        match state {
            PodState::NotFound => self.create_pod(&desired).await?,
            PodState::MustBeDeleted {
                grace_period_seconds,
            } => {
                self.delete_pod(namespace, &pod_name, grace_period_seconds)
                    .await?;
                self.wait_for_termination(namespace, &pod_name, cancel)
                    .await?;
                self.create_pod(&desired).await?;
            }
            PodState::Terminating => {
                self.wait_for_termination(namespace, &pod_name, cancel)
                    .await?;
                self.create_pod(&desired).await?;
            }
            PodState::Running | PodState::Pending => {}
        }

        self.wait_for_ip(namespace, &pod_name, cancel).await
    }

    async fn create_pod(&self, pod: &k8s_openapi::api::core::v1::Pod) -> Result<(), RunnerError> {
        self.cluster.create_pod(pod).await?;
        metrics::increment_runner_pods_created();
        info!(
            pod = pod.metadata.name.as_deref().unwrap_or_default(),
            "Created runner pod"
        );
        Ok(())
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: i64,
    ) -> Result<(), RunnerError> {
        match self
            .cluster
            .delete_pod(namespace, name, grace_period_seconds)
            .await
        {
            Ok(()) => {
                metrics::increment_runner_pods_deleted();
                info!(pod = %name, grace_period_seconds, "Deleted runner pod");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_for_termination(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RunnerError> {
        let timeout = self.config.creation_timeout;
        let result = poll_until(
            self.config.termination_poll_interval,
            timeout,
            cancel,
            || async move {
                let pod = self.cluster.get_pod(namespace, name).await?;
                Ok::<_, ClusterError>(pod.is_none().then_some(()))
            },
        )
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(PollError::Timeout(timeout)) => Err(RunnerError::TerminationTimeout {
                pod: name.to_string(),
                timeout,
            }),
            Err(PollError::Cancelled) => Err(RunnerError::Cancelled),
            Err(PollError::Failed(e)) => Err(e.into()),
        }
    }

    async fn wait_for_ip(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<String, RunnerError> {
        let result = poll_until(
            self.config.ip_poll_interval,
            self.config.creation_timeout,
            cancel,
            || async move {
                let pod = self.cluster.get_pod(namespace, name).await?;
                Ok::<_, ClusterError>(pod.as_ref().and_then(pod_ip).map(str::to_string))
            },
        )
        .await;

        match result {
            Ok(ip) => {
                debug!(pod = %name, ip = %ip, "Runner pod has an IP");
                Ok(ip)
            }
            Err(PollError::Timeout(timeout)) => {
                error!(pod = %name, "Runner pod did not get an IP, force killing it");
                if let Err(e) = self
                    .delete_pod(namespace, name, FORCE_KILL_GRACE_PERIOD_SECS)
                    .await
                {
                    error!(pod = %name, error = %e, "Failed to delete runner pod without an IP");
                }
                Err(RunnerError::IpTimeout {
                    pod: name.to_string(),
                    timeout,
                })
            }
            Err(PollError::Cancelled) => Err(RunnerError::Cancelled),
            Err(PollError::Failed(e)) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone)]
struct RunnerPodRef {
    namespace: String,
    name: String,
}

/// A live runner connection for one reconcile pass
pub struct RunnerSession {
    client: Arc<dyn RunnerApi>,
    pod: Option<RunnerPodRef>,
    cluster: Arc<dyn ClusterClient>,
    cleanup_poll_interval: Duration,
    cleanup_timeout: Duration,
}

impl std::fmt::Debug for RunnerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerSession")
            .field("pod", &self.pod)
            .finish_non_exhaustive()
    }
}

impl RunnerSession {
    pub fn client(&self) -> &dyn RunnerApi {
        self.client.as_ref()
    }

    /// Drops the connection and, when asked, removes the runner pod.
    /// Cleanup failures are logged, never returned.
    pub async fn close(self, cleanup_pod: bool, cancel: &CancellationToken) {
        let RunnerSession {
            client,
            pod,
            cluster,
            cleanup_poll_interval,
            cleanup_timeout,
        } = self;
        drop(client);

        let Some(pod) = pod.filter(|_| cleanup_pod) else {
            return;
        };
        cleanup_runner_pod(
            cluster.as_ref(),
            &pod,
            cleanup_poll_interval,
            cleanup_timeout,
            cancel,
        )
        .await;
    }
}

async fn cleanup_runner_pod(
    cluster: &dyn ClusterClient,
    pod: &RunnerPodRef,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) {
    match cluster
        .delete_pod(&pod.namespace, &pod.name, FORCE_KILL_GRACE_PERIOD_SECS)
        .await
    {
        Ok(()) => metrics::increment_runner_pods_deleted(),
        Err(e) if e.is_not_found() => return,
        Err(e) => {
            warn!(pod = %pod.name, error = %e, "Failed to delete runner pod");
            return;
        }
    }

    let result = poll_until(interval, timeout, cancel, || async move {
        let live = cluster.get_pod(&pod.namespace, &pod.name).await?;
        Ok::<_, ClusterError>(live.is_none().then_some(()))
    })
    .await;
    match result {
        Ok(()) => debug!(pod = %pod.name, "Runner pod cleaned up"),
        Err(e) => warn!(pod = %pod.name, error = %e, "Failed to wait for runner pod cleanup"),
    }
}
