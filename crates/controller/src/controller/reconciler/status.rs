//! Status persistence for a reconcile pass.

use super::types::ReconcilerError;
use crate::cluster::ClusterClient;
use crate::constants::RECONCILE_REQUEST_ANNOTATION;
use crate::crd::{Terraform, TerraformStatus};
use tracing::debug;

/// Copies the reconcile request annotation into the status and, once Ready
/// is True, the generation it was computed from. Then merge-patches the
/// status subresource.
pub async fn persist_status(
    cluster: &dyn ClusterClient,
    terraform: &mut Terraform,
) -> Result<(), ReconcilerError> {
    let generation = terraform.generation();
    let requested_at = terraform
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(RECONCILE_REQUEST_ANNOTATION))
        .cloned();

    let namespace = terraform.namespace_or_default().to_string();
    let name = terraform.name().to_string();

    let status = terraform.status.get_or_insert_with(TerraformStatus::default);
    if let Some(requested_at) = requested_at {
        status.last_handled_reconcile_at = Some(requested_at);
    }
    if status.is_ready() {
        status.observed_generation = Some(generation);
    }

    cluster
        .patch_terraform_status(&namespace, &name, status)
        .await?;
    debug!("Status persisted");
    Ok(())
}
