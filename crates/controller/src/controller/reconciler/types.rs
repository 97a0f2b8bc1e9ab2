//! # Reconciler Types
//!
//! Shared context handed to every reconcile pass, the error taxonomy and the
//! single requeue mapping used by both the engine and the error policy.

use crate::certs::CertError;
use crate::cluster::{ClusterClient, ClusterError};
use crate::config::{ControllerConfig, SharedControllerConfig};
use crate::controller::webhooks::{WebhookError, WebhookInvoker};
use crate::crd::{Outcome, Terraform};
use crate::dependency::DependencyError;
use crate::policy::LifecyclePolicy;
use crate::runner::{RunnerError, RunnerOrchestrator};
use crate::shutdown::ShutdownCoordinator;
use crate::source::{ArtifactDescriptor, ArtifactError, ArtifactFetcher, SourceError, SourceProvider};
use kube::runtime::controller::Action;
use prost::Message;
use runner_proto::{ApplyReply, PlanReply};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Everything a reconcile pass needs, shared across passes
pub struct Reconciler {
    pub cluster: Arc<dyn ClusterClient>,
    pub sources: Arc<dyn SourceProvider>,
    pub fetcher: Arc<dyn ArtifactFetcher>,
    pub runners: RunnerOrchestrator,
    pub webhooks: WebhookInvoker,
    pub config: SharedControllerConfig,
    pub shutdown: Arc<ShutdownCoordinator>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("{0}")]
    SourceNotFound(String),

    #[error("{0}")]
    AccessDenied(String),

    #[error("{0}")]
    DependencyNotReady(String),

    #[error("drift detected")]
    DriftDetected,

    #[error("{0}")]
    ExecutionFailed(String),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error("could not get Source object: {0}")]
    Source(#[from] SourceError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Certificates(#[from] CertError),

    #[error("runner call failed: {}", .0.message())]
    Rpc(#[from] tonic::Status),
}

impl From<DependencyError> for ReconcilerError {
    fn from(error: DependencyError) -> Self {
        match error {
            DependencyError::AccessDenied(msg) => ReconcilerError::AccessDenied(msg),
            DependencyError::NotReady(msg) => ReconcilerError::DependencyNotReady(msg),
            cycle @ DependencyError::Cycle(_) => {
                ReconcilerError::DependencyNotReady(cycle.to_string())
            }
            DependencyError::Api(e) => ReconcilerError::Cluster(e),
        }
    }
}

/// How a failed pass is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    NotFound,
    AccessDenied,
    Transient,
    DependencyNotReady,
    DriftDetected,
    ExecutionFailed,
}

impl RetryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryClass::NotFound => "not_found",
            RetryClass::AccessDenied => "access_denied",
            RetryClass::Transient => "transient",
            RetryClass::DependencyNotReady => "dependency_not_ready",
            RetryClass::DriftDetected => "drift_detected",
            RetryClass::ExecutionFailed => "execution_failed",
        }
    }
}

impl ReconcilerError {
    pub fn classify(&self) -> RetryClass {
        match self {
            ReconcilerError::SourceNotFound(_) => RetryClass::NotFound,
            ReconcilerError::AccessDenied(_) => RetryClass::AccessDenied,
            ReconcilerError::DependencyNotReady(_) => RetryClass::DependencyNotReady,
            ReconcilerError::DriftDetected => RetryClass::DriftDetected,
            ReconcilerError::ExecutionFailed(_)
            | ReconcilerError::Artifact(_)
            | ReconcilerError::Webhook(_) => RetryClass::ExecutionFailed,
            ReconcilerError::Source(SourceError::NotFound { .. }) => RetryClass::NotFound,
            ReconcilerError::Source(SourceError::AccessDenied { .. }) => RetryClass::AccessDenied,
            ReconcilerError::Source(_)
            | ReconcilerError::Cluster(_)
            | ReconcilerError::Runner(_)
            | ReconcilerError::Certificates(_)
            | ReconcilerError::Rpc(_) => RetryClass::Transient,
        }
    }
}

/// Requeue decision for a failure class
pub fn requeue_action(class: RetryClass, terraform: &Terraform, config: &ControllerConfig) -> Action {
    match class {
        RetryClass::Transient => Action::requeue(Duration::ZERO),
        RetryClass::AccessDenied => Action::await_change(),
        RetryClass::DependencyNotReady => Action::requeue(config.dependency_requeue_interval),
        RetryClass::NotFound | RetryClass::DriftDetected | RetryClass::ExecutionFailed => {
            Action::requeue(LifecyclePolicy::new(terraform).retry_interval())
        }
    }
}

/// State of one reconcile pass
pub(super) struct Pass<'a> {
    pub ctx: &'a Reconciler,
    pub terraform: Terraform,
    pub artifact: ArtifactDescriptor,
    pub loop_id: String,
    pub cancel: CancellationToken,
}

impl Pass<'_> {
    pub fn revision(&self) -> &str {
        &self.artifact.revision
    }

    pub fn record(&mut self, outcome: Outcome) {
        self.terraform.record(outcome);
    }

    /// Writes the in-memory status to the cluster
    pub async fn persist(&mut self) -> Result<(), ReconcilerError> {
        super::status::persist_status(self.ctx.cluster.as_ref(), &mut self.terraform).await
    }

    pub async fn record_and_persist(&mut self, outcome: Outcome) -> Result<(), ReconcilerError> {
        self.record(outcome);
        self.persist().await
    }

    /// Records Ready=False and returns the matching execution error
    pub fn fail(&mut self, reason: crate::crd::Reason, msg: String) -> ReconcilerError {
        let revision = self.revision().to_string();
        self.record(Outcome::NotReady {
            revision,
            reason,
            msg: msg.clone(),
        });
        ReconcilerError::ExecutionFailed(msg)
    }
}

/// `"{context}: {message}"` for a failed runner call
pub(super) fn rpc_error(context: &str, status: &tonic::Status) -> String {
    format!("{context}: {}", status.message())
}

/// State lock identifier a failed Plan reports in its status details
pub(super) fn plan_lock_id(status: &tonic::Status) -> Option<String> {
    PlanReply::decode(status.details())
        .ok()
        .map(|reply| reply.state_lock_identifier)
        .filter(|id| !id.is_empty())
}

/// State lock identifier a failed Apply reports in its status details
pub(super) fn apply_lock_id(status: &tonic::Status) -> Option<String> {
    ApplyReply::decode(status.details())
        .ok()
        .map(|reply| reply.state_lock_identifier)
        .filter(|id| !id.is_empty())
}

/// Records the held state lock so users can force-unlock it
pub(super) fn locked_outcome(lock_id: String) -> Outcome {
    Outcome::StateLocked {
        msg: format!("Terraform Locked with Lock Identifier: {lock_id}"),
        lock_id,
    }
}
