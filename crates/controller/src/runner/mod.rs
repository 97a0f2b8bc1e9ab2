//! # Runner Orchestration
//!
//! Guarantees one reachable, mutually authenticated runner pod per
//! Terraform object and hands the reconciler a client for it.
//!
//! ## Sub-modules
//!
//! - `pod` - Runner pod template, state classification and hostnames
//! - `poll` - Cancellable fixed-interval polling
//! - `connection` - mTLS dialing of the runner gRPC endpoint
//! - `retry` - Client wrapper retrying transient unavailability
//! - `orchestrator` - The provisioning protocol and the per-pass session

mod connection;
mod orchestrator;
mod pod;
mod poll;
mod retry;

pub use connection::{runner_hostname, TlsRunnerDialer};
pub use orchestrator::{RunnerOrchestrator, RunnerSession};
pub use pod::{
    classify_pod, instance_label, pod_ip, runner_pod, runner_pod_name, PodState,
};
pub use poll::{poll_until, PollError};
pub use retry::{retry_unavailable, RetryPolicy, RetryingRunnerClient};

use crate::certs::{CertError, NamespaceTls};
use crate::cluster::ClusterError;
use async_trait::async_trait;
use runner_proto::*;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tonic::Status;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("runner certificates unavailable: {0}")]
    Certificates(#[from] CertError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("invalid revision format: {0}")]
    InvalidRevision(String),

    #[error("failed to wait for the old pod {pod} termination after {timeout:?}")]
    TerminationTimeout { pod: String, timeout: Duration },

    #[error("failed to create and obtain pod ip for {pod} within {timeout:?}")]
    IpTimeout { pod: String, timeout: Duration },

    #[error("runner provisioning cancelled")]
    Cancelled,

    #[error("failed to connect to runner at {host}: {reason}")]
    Dial { host: String, reason: String },
}

/// Where a runner listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerTarget {
    pub host: String,
    pub port: u16,
}

/// The runner RPC surface used by the reconciler
#[async_trait]
pub trait RunnerApi: Send + Sync {
    async fn upload_and_extract(
        &self,
        request: UploadAndExtractRequest,
    ) -> Result<UploadAndExtractReply, Status>;
    async fn new_terraform(&self, request: NewTerraformRequest)
        -> Result<NewTerraformReply, Status>;
    async fn write_backend_config(
        &self,
        request: WriteBackendConfigRequest,
    ) -> Result<WriteBackendConfigReply, Status>;
    async fn process_cli_config(
        &self,
        request: ProcessCliConfigRequest,
    ) -> Result<ProcessCliConfigReply, Status>;
    async fn set_env(&self, request: SetEnvRequest) -> Result<SetEnvReply, Status>;
    async fn generate_vars_for_tf(
        &self,
        request: GenerateVarsForTfRequest,
    ) -> Result<GenerateVarsForTfReply, Status>;
    async fn init(&self, request: InitRequest) -> Result<InitReply, Status>;
    async fn force_unlock(&self, request: ForceUnlockRequest) -> Result<ForceUnlockReply, Status>;
    async fn plan(&self, request: PlanRequest) -> Result<PlanReply, Status>;
    async fn save_tf_plan(&self, request: SaveTfPlanRequest) -> Result<SaveTfPlanReply, Status>;
    async fn load_tf_plan(&self, request: LoadTfPlanRequest) -> Result<LoadTfPlanReply, Status>;
    async fn apply(&self, request: ApplyRequest) -> Result<ApplyReply, Status>;
    async fn destroy(&self, request: DestroyRequest) -> Result<DestroyReply, Status>;
    async fn output(&self, request: OutputRequest) -> Result<OutputReply, Status>;
    async fn write_outputs(
        &self,
        request: WriteOutputsRequest,
    ) -> Result<WriteOutputsReply, Status>;
    async fn show_plan_file(
        &self,
        request: ShowPlanFileRequest,
    ) -> Result<ShowPlanFileReply, Status>;
    async fn show_plan_file_raw(
        &self,
        request: ShowPlanFileRawRequest,
    ) -> Result<ShowPlanFileRawReply, Status>;
    async fn finalize_secrets(
        &self,
        request: FinalizeSecretsRequest,
    ) -> Result<FinalizeSecretsReply, Status>;
    async fn cleanup_dir(&self, request: CleanupDirRequest) -> Result<CleanupDirReply, Status>;
}

/// Opens an authenticated connection to a runner
#[async_trait]
pub trait RunnerDialer: Send + Sync {
    async fn dial(
        &self,
        target: &RunnerTarget,
        tls: &NamespaceTls,
    ) -> Result<Arc<dyn RunnerApi>, RunnerError>;
}
