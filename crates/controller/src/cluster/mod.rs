//! # Cluster Access
//!
//! Every Kubernetes read and write made by the reconciler goes through
//! [`ClusterClient`], so passes can run against an in-memory cluster in tests.

mod kube_client;

pub use kube_client::KubeClusterClient;

use crate::crd::{Terraform, TerraformStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by cluster operations
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// The object changed since it was read
    #[error("{kind} {namespace}/{name} was modified concurrently")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("invalid object: {0}")]
    Invalid(String),
}

impl ClusterError {
    pub fn not_found(kind: &'static str, namespace: &str, name: &str) -> Self {
        ClusterError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict { .. })
    }
}

/// Kubernetes operations needed by the reconciler, runner orchestrator,
/// dependency resolver and certificate rotator.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a Terraform object; `None` when it does not exist
    async fn get_terraform(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Terraform>, ClusterError>;

    /// List Terraform objects across all namespaces
    async fn list_terraforms(&self) -> Result<Vec<Terraform>, ClusterError>;

    /// Merge-patch the status subresource. A missing object is not an error.
    async fn patch_terraform_status(
        &self,
        namespace: &str,
        name: &str,
        status: &TerraformStatus,
    ) -> Result<(), ClusterError>;

    /// Replace the finalizer list of a Terraform object. When `resource_version`
    /// is set the write fails with [`ClusterError::Conflict`] if the object has
    /// changed since that version was read.
    async fn patch_terraform_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<(), ClusterError>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ClusterError>;

    async fn create_pod(&self, pod: &Pod) -> Result<(), ClusterError>;

    /// Delete a pod with the given grace period and foreground propagation
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: i64,
    ) -> Result<(), ClusterError>;

    async fn get_secret(&self, namespace: &str, name: &str)
        -> Result<Option<Secret>, ClusterError>;

    async fn create_secret(&self, secret: &Secret) -> Result<(), ClusterError>;

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, ClusterError>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// List secrets in every namespace matching a label selector
    async fn list_secrets(&self, label_selector: &str) -> Result<Vec<Secret>, ClusterError>;
}

/// Attempts made by [`ensure_finalizer`] and [`remove_finalizer`] before a
/// conflict is returned to the caller
const FINALIZER_PATCH_ATTEMPTS: usize = 5;

/// Adds a finalizer to an object when missing; returns whether a write happened
pub async fn ensure_finalizer(
    cluster: &dyn ClusterClient,
    terraform: &Terraform,
    finalizer: &str,
) -> Result<bool, ClusterError> {
    update_finalizers(cluster, terraform, |finalizers| {
        if finalizers.iter().any(|f| f == finalizer) {
            return false;
        }
        finalizers.push(finalizer.to_string());
        true
    })
    .await
}

/// Removes a finalizer from an object when present; returns whether a write happened
pub async fn remove_finalizer(
    cluster: &dyn ClusterClient,
    terraform: &Terraform,
    finalizer: &str,
) -> Result<bool, ClusterError> {
    update_finalizers(cluster, terraform, |finalizers| {
        let before = finalizers.len();
        finalizers.retain(|f| f != finalizer);
        finalizers.len() != before
    })
    .await
}

/// Applies `edit` to the finalizer list under optimistic concurrency.
///
/// The write is pinned to the resourceVersion the list was computed from. On a
/// conflict the object is read again and the edit recomputed, so finalizers
/// added or removed by other writers in the meantime survive.
async fn update_finalizers<F>(
    cluster: &dyn ClusterClient,
    terraform: &Terraform,
    edit: F,
) -> Result<bool, ClusterError>
where
    F: Fn(&mut Vec<String>) -> bool,
{
    let namespace = terraform.namespace_or_default();
    let name = terraform.name();
    let mut current = terraform.clone();
    let mut attempt = 1;
    loop {
        let mut finalizers = current.finalizers().to_vec();
        if !edit(&mut finalizers) {
            return Ok(false);
        }
        let resource_version = current.metadata.resource_version.as_deref();
        match cluster
            .patch_terraform_finalizers(namespace, name, resource_version, &finalizers)
            .await
        {
            Ok(()) => return Ok(true),
            Err(e) if e.is_conflict() && attempt < FINALIZER_PATCH_ATTEMPTS => {
                debug!(
                    attempt,
                    "Finalizers of {}/{} changed concurrently, retrying", namespace, name
                );
                attempt += 1;
                current = cluster
                    .get_terraform(namespace, name)
                    .await?
                    .ok_or_else(|| ClusterError::not_found("Terraform", namespace, name))?;
            }
            Err(e) => return Err(e),
        }
    }
}
