//! Certificate rotation actor.
//!
//! The actor owns the CA generations and the per-namespace bundles. Work
//! reaches it only through [`RotatorRequest`] messages, so regeneration is
//! serialised without locks.

use super::{CertError, NamespaceTls, RunnerCa};
use crate::cluster::ClusterClient;
use crate::config::CertRotationConfig;
use crate::constants::RUNNER_LABEL;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const REQUEST_BUFFER: usize = 64;

enum RotatorRequest {
    RotateCa {
        reply: oneshot::Sender<Result<(), CertError>>,
    },
    NamespaceTls {
        namespace: String,
        reply: oneshot::Sender<Result<NamespaceTls, CertError>>,
    },
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Cloneable client side of the rotator
#[derive(Clone)]
pub struct CertRotatorHandle {
    requests: mpsc::Sender<RotatorRequest>,
    ready: watch::Receiver<bool>,
    /// Expiry of the newest CA, published by the actor
    ca_valid_until: watch::Receiver<Option<i64>>,
    lookahead: Duration,
}

impl std::fmt::Debug for CertRotatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertRotatorHandle")
            .field("ready", &*self.ready.borrow())
            .field("ca_valid_until", &*self.ca_valid_until.borrow())
            .finish_non_exhaustive()
    }
}

impl CertRotatorHandle {
    /// Blocks until the first CA exists
    pub async fn wait_ready(&self) -> Result<(), CertError> {
        let mut ready = self.ready.clone();
        ready
            .wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| CertError::RotatorStopped)
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Whether the newest CA outlives the lookahead window
    pub fn is_ca_valid(&self) -> bool {
        let lookahead = i64::try_from(self.lookahead.as_secs()).unwrap_or(i64::MAX);
        self.ca_valid_until
            .borrow()
            .is_some_and(|valid_until| valid_until > now_unix().saturating_add(lookahead))
    }

    /// Regenerates the CA if it is no longer valid; returns once the actor has replied
    pub async fn rotate_ca(&self) -> Result<(), CertError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(RotatorRequest::RotateCa { reply })
            .await
            .map_err(|_| CertError::RotatorStopped)?;
        response.await.map_err(|_| CertError::RotatorStopped)?
    }

    /// TLS bundle for runners in `namespace`, issued against the current CA
    pub async fn namespace_tls(&self, namespace: &str) -> Result<NamespaceTls, CertError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(RotatorRequest::NamespaceTls {
                namespace: namespace.to_string(),
                reply,
            })
            .await
            .map_err(|_| CertError::RotatorStopped)?;
        response.await.map_err(|_| CertError::RotatorStopped)?
    }
}

/// Actor state. Constructed and consumed by [`CertRotator::spawn`].
pub struct CertRotator {
    cluster: Arc<dyn ClusterClient>,
    config: CertRotationConfig,
    cluster_domain: String,
    include_localhost: bool,
    /// Oldest first
    cas: Vec<RunnerCa>,
    issued: HashMap<String, NamespaceTls>,
    requests: mpsc::Receiver<RotatorRequest>,
    ready: watch::Sender<bool>,
    ca_valid_until: watch::Sender<Option<i64>>,
}

impl CertRotator {
    /// Starts the actor and returns its handle
    pub fn spawn(
        cluster: Arc<dyn ClusterClient>,
        config: CertRotationConfig,
        cluster_domain: String,
        include_localhost: bool,
    ) -> (CertRotatorHandle, JoinHandle<()>) {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_BUFFER);
        let (ready_tx, ready_rx) = watch::channel(false);
        let (valid_tx, valid_rx) = watch::channel(None);

        let handle = CertRotatorHandle {
            requests: request_tx,
            ready: ready_rx,
            ca_valid_until: valid_rx,
            lookahead: config.lookahead,
        };
        let actor = CertRotator {
            cluster,
            config,
            cluster_domain,
            include_localhost,
            cas: Vec::new(),
            issued: HashMap::new(),
            requests: request_rx,
            ready: ready_tx,
            ca_valid_until: valid_tx,
        };
        let task = tokio::spawn(actor.run());
        (handle, task)
    }

    async fn run(mut self) {
        match self.rotate_if_needed() {
            Ok(()) => info!("Runner CA generated, certificate rotator ready"),
            Err(e) => error!(error = %e, "Failed to generate initial runner CA, retrying on next check"),
        }

        let mut ticker = tokio::time::interval(self.config.rotation_check_frequency);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle(request),
                    None => break,
                },
                _ = ticker.tick() => self.on_tick().await,
            }
        }
        debug!("All rotator handles dropped, stopping certificate rotator");
    }

    fn handle(&mut self, request: RotatorRequest) {
        match request {
            RotatorRequest::RotateCa { reply } => {
                let _ = reply.send(self.rotate_if_needed());
            }
            RotatorRequest::NamespaceTls { namespace, reply } => {
                let _ = reply.send(self.namespace_tls(&namespace));
            }
        }
    }

    fn current_ca(&self) -> Option<&RunnerCa> {
        self.cas.last()
    }

    fn current_ca_valid(&self) -> bool {
        self.current_ca()
            .is_some_and(|ca| ca.is_valid_at(now_unix(), self.config.lookahead))
    }

    fn rotate_if_needed(&mut self) -> Result<(), CertError> {
        if self.current_ca_valid() {
            return Ok(());
        }

        let ca = RunnerCa::generate(self.config.ca_validity)?;
        info!(valid_until = ca.valid_until(), "Generated new runner CA");
        let valid_until = ca.valid_until();
        self.cas.push(ca);

        let namespaces: Vec<String> = self.issued.keys().cloned().collect();
        for namespace in namespaces {
            if let Err(e) = self.issue(&namespace) {
                warn!(namespace = %namespace, error = %e, "Failed to re-issue runner TLS after CA rotation");
            }
        }

        self.ca_valid_until.send_replace(Some(valid_until));
        self.ready.send_replace(true);
        Ok(())
    }

    fn namespace_tls(&mut self, namespace: &str) -> Result<NamespaceTls, CertError> {
        self.rotate_if_needed()?;
        let current = self.current_ca().ok_or(CertError::NoCa)?.valid_until();
        match self.issued.get(namespace) {
            Some(tls) if tls.valid_until == current => Ok(tls.clone()),
            _ => self.issue(namespace),
        }
    }

    fn issue(&mut self, namespace: &str) -> Result<NamespaceTls, CertError> {
        let ca = self.current_ca().ok_or(CertError::NoCa)?;
        let tls = ca.issue_namespace_tls(namespace, &self.cluster_domain, self.include_localhost)?;
        debug!(namespace = %namespace, secret = %tls.secret_name, "Issued runner TLS bundle");
        self.issued.insert(namespace.to_string(), tls.clone());
        Ok(tls)
    }

    async fn on_tick(&mut self) {
        if let Err(e) = self.rotate_if_needed() {
            error!(error = %e, "Runner CA rotation failed");
        }

        let now = now_unix();
        self.cas.retain(|ca| !ca.is_expired_at(now));
        self.collect_expired_secrets(now).await;
    }

    async fn collect_expired_secrets(&self, now: i64) {
        let selector = format!("{}=true", RUNNER_LABEL);
        let secrets = match self.cluster.list_secrets(&selector).await {
            Ok(secrets) => secrets,
            Err(e) => {
                warn!(error = %e, "Failed to list runner TLS secrets");
                return;
            }
        };

        for secret in secrets {
            let (Some(name), Some(namespace)) = (
                secret.metadata.name.as_deref(),
                secret.metadata.namespace.as_deref(),
            ) else {
                continue;
            };
            let expired = NamespaceTls::valid_until_from_secret_name(name)
                .is_some_and(|valid_until| valid_until <= now);
            if !expired {
                continue;
            }
            match self.cluster.delete_secret(namespace, name).await {
                Ok(()) => info!(namespace = %namespace, secret = %name, "Deleted expired runner TLS secret"),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(namespace = %namespace, secret = %name, error = %e, "Failed to delete expired runner TLS secret"),
            }
        }
    }
}
