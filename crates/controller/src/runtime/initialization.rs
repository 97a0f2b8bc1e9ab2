//! # Initialization
//!
//! Controller initialization: rustls setup, tracing, metrics, the health
//! server, the Kubernetes client, the certificate rotator and the reconciler
//! context.

use crate::certs::CertRotator;
use crate::cluster::{ClusterClient, KubeClusterClient};
use crate::config::{load_config, ServerConfig};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::controller::webhooks::WebhookInvoker;
use crate::observability;
use crate::runner::{RunnerOrchestrator, TlsRunnerDialer};
use crate::shutdown::ShutdownCoordinator;
use crate::source::{HttpArtifactFetcher, KubeSourceProvider};
use anyhow::{Context, Result};
use kube::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
    /// Certificate rotator actor; ends once every handle is dropped
    pub rotator_task: JoinHandle<()>,
}

/// Initialize the controller runtime
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before anything touches rustls
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "controller=info,tf_controller=info".into()),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Terraform controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    let (config, server_config) = load_config();
    info!(
        concurrent_reconciles = config.concurrent_reconciles,
        no_cross_namespace_refs = config.no_cross_namespace_refs,
        insecure_local_runner = config.runner.insecure_local_runner,
        "Configuration loaded"
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_handle = tokio::spawn({
        let state = Arc::clone(&server_state);
        let addr = server_config.socket_addr();
        async move {
            if let Err(e) = start_server(addr, state).await {
                error!("HTTP server error: {:#}", e);
            }
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let cluster: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(client.clone()));

    let (certs, rotator_task) = CertRotator::spawn(
        Arc::clone(&cluster),
        config.certs.clone(),
        config.runner.cluster_domain.clone(),
        config.runner.insecure_local_runner,
    );
    tokio::spawn({
        let certs = certs.clone();
        let certs_ready = Arc::clone(&server_state.certs_ready);
        async move {
            match certs.wait_ready().await {
                Ok(()) => certs_ready.store(true, Ordering::Relaxed),
                Err(e) => warn!(error = %e, "Certificate rotator stopped before becoming ready"),
            }
        }
    });

    let fetcher = HttpArtifactFetcher::new(config.source_controller_localhost.clone())
        .context("Failed to create artifact fetcher")?;
    let runners = RunnerOrchestrator::new(
        Arc::clone(&cluster),
        certs,
        Arc::new(TlsRunnerDialer::new(&config.runner)),
        config.runner.clone(),
    );

    let reconciler = Arc::new(Reconciler {
        cluster,
        sources: Arc::new(KubeSourceProvider::new(client.clone())),
        fetcher: Arc::new(fetcher),
        runners,
        webhooks: WebhookInvoker::new(config.disable_webhook_tls_verify),
        shutdown: ShutdownCoordinator::new(config.shutdown_timeout),
        config: Arc::new(config),
    });

    info!("Controller initialized, starting watch loop...");
    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
        rotator_task,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &JoinHandle<()>,
    config: &ServerConfig,
) -> Result<()> {
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > config.startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {:?}",
                config.startup_timeout
            ));
        }
        tokio::time::sleep(config.ready_poll_interval).await;
    }
}
