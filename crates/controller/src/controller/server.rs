//! # HTTP Server
//!
//! Serves `/metrics`, `/healthz` and `/readyz`. The process is ready once the
//! listener is bound and the runner CA exists.

use crate::observability::metrics::gather_metrics;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Default)]
pub struct ServerState {
    /// Set once the listener is bound
    pub is_ready: Arc<AtomicBool>,
    /// Set once the certificate rotator produced its first CA
    pub certs_ready: Arc<AtomicBool>,
}

impl ServerState {
    fn ready(&self) -> bool {
        self.is_ready.load(Ordering::Relaxed) && self.certs_ready.load(Ordering::Relaxed)
    }
}

pub fn routes(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds the listener, flags the state and serves until the process exits
pub async fn start_server(addr: SocketAddr, state: Arc<ServerState>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {addr}"))?;
    info!(addr = %addr, "HTTP server listening");
    state.is_ready.store(true, Ordering::Relaxed);

    axum::serve(listener, routes(state))
        .await
        .context("HTTP server error")
}

async fn metrics() -> Result<String, (StatusCode, String)> {
    gather_metrics().map_err(|e| {
        error!(error = %e, "Failed to gather metrics");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

async fn readyz(State(state): State<Arc<ServerState>>) -> (StatusCode, &'static str) {
    if state.ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_readyz_requires_certificates() {
        let state = Arc::new(ServerState::default());
        state.is_ready.store(true, Ordering::Relaxed);
        assert_eq!(readyz(State(Arc::clone(&state))).await.0, StatusCode::SERVICE_UNAVAILABLE);
        state.certs_ready.store(true, Ordering::Relaxed);
        assert_eq!(readyz(State(state)).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_routes_serve_health_and_metrics() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let state = Arc::new(ServerState::default());
        let response = routes(Arc::clone(&state))
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = routes(state)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
