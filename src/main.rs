//! # Terraform Controller
//!
//! A Kubernetes controller that reconciles `Terraform` resources: it fetches
//! the configuration from a Flux source, runs plan and apply inside an
//! ephemeral runner pod over mutually authenticated gRPC, and records the
//! results on the resource status.
//!
//! ## Features
//!
//! - **Manual or automatic approval**: plans wait for `approvePlan` unless set to `auto`
//! - **Drift detection**: applied infrastructure is re-checked every interval
//! - **Dependencies**: resources wait for the objects they depend on to be ready
//! - **Outputs**: Terraform outputs can be written to a Kubernetes secret
//! - **Post-planning webhooks**: external policy checks can veto a plan
//! - **Prometheus metrics** and health endpoints
//! - **Graceful shutdown**: in-flight passes drain on SIGTERM

use anyhow::Result;
use controller::runtime::initialization::initialize;
use controller::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let init_result = initialize().await?;
    run_watch_loop(init_result).await
}
