//! Dependency gates evaluated during reconciliation.

use super::{blocking_dependents, DependencyError, DependencyGraph, DependencyLock, ObjectKey};
use crate::cluster::{ensure_finalizer, remove_finalizer, ClusterClient};
use crate::crd::{SourceKind, Terraform};
use tracing::{debug, error, info};

/// Whether a deleting object may be finalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionGate {
    Clear,
    /// Dependents still holding a lock
    Blocked(Vec<String>),
}

fn dependency_namespace<'a>(namespace: Option<&'a str>, owner: &'a Terraform) -> &'a str {
    namespace.unwrap_or_else(|| owner.namespace_or_default())
}

/// Verifies every declared dependency is ready, locking each one against deletion
pub async fn check_dependencies(
    cluster: &dyn ClusterClient,
    terraform: &Terraform,
    revision: &str,
    no_cross_namespace_refs: bool,
) -> Result<(), DependencyError> {
    let lock = DependencyLock::for_dependent(terraform.name()).finalizer();
    let own_source_namespace = terraform
        .spec
        .source_ref
        .namespace_or(terraform.namespace_or_default());

    for dependency in &terraform.spec.depends_on {
        let namespace = dependency_namespace(dependency.namespace.as_deref(), terraform);
        let key = ObjectKey::new(namespace, &dependency.name);

        if no_cross_namespace_refs && namespace != terraform.namespace_or_default() {
            return Err(DependencyError::AccessDenied(format!(
                "cannot access {}, cross-namespace references have been disabled",
                key
            )));
        }

        let Some(upstream) = cluster.get_terraform(namespace, &dependency.name).await? else {
            return Err(DependencyError::NotReady(format!(
                "unable to get '{}' dependency: not found",
                key
            )));
        };

        if !upstream.is_deleting() && ensure_finalizer(cluster, &upstream, &lock).await? {
            debug!("Added dependency lock {} to {}", lock, key);
        }

        let status = upstream.status_or_default();
        let observed = status.observed_generation.unwrap_or_default();
        if status.conditions.is_empty() || observed != upstream.generation() || !status.is_ready() {
            return Err(DependencyError::NotReady(format!(
                "dependency '{}' is not ready",
                key
            )));
        }

        let upstream_source = &upstream.spec.source_ref;
        let same_source = upstream_source.kind == terraform.spec.source_ref.kind
            && upstream_source.name == terraform.spec.source_ref.name
            && upstream_source.namespace_or(namespace) == own_source_namespace;
        if same_source
            && status.last_applied_revision != revision
            && status.last_planned_revision != revision
        {
            return Err(DependencyError::NotReady(format!(
                "dependency '{}' is not updated yet",
                key
            )));
        }

        if let Some(outputs) = &upstream.spec.write_outputs_to_secret {
            if cluster.get_secret(namespace, &outputs.name).await?.is_none() {
                return Err(DependencyError::NotReady(format!(
                    "dependency output secret: '{}/{}' of '{}' is not ready yet",
                    namespace, outputs.name, key
                )));
            }
        }
    }
    Ok(())
}

/// Deleting objects wait until no dependent holds a lock on them
pub fn deletion_gate(terraform: &Terraform) -> DeletionGate {
    let blocking = blocking_dependents(terraform.finalizers());
    if blocking.is_empty() {
        DeletionGate::Clear
    } else {
        DeletionGate::Blocked(blocking)
    }
}

/// Removes this object's lock from every declared dependency that still exists
pub async fn release_locks(
    cluster: &dyn ClusterClient,
    terraform: &Terraform,
) -> Result<(), DependencyError> {
    let lock = DependencyLock::for_dependent(terraform.name()).finalizer();
    for dependency in &terraform.spec.depends_on {
        let namespace = dependency_namespace(dependency.namespace.as_deref(), terraform);
        let Some(upstream) = cluster.get_terraform(namespace, &dependency.name).await? else {
            continue;
        };
        match remove_finalizer(cluster, &upstream, &lock).await {
            Ok(true) => info!(
                "Released dependency lock {} on {}/{}",
                lock, namespace, dependency.name
            ),
            Ok(false) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Objects to reconcile after a source published `revision`, dependencies first
pub fn requests_for_revision_change(
    kind: SourceKind,
    source_namespace: &str,
    source_name: &str,
    revision: &str,
    candidates: &[Terraform],
) -> Vec<ObjectKey> {
    let affected: Vec<&Terraform> = candidates
        .iter()
        .filter(|tf| {
            let source = &tf.spec.source_ref;
            source.kind == kind
                && source.name == source_name
                && source.namespace_or(tf.namespace_or_default()) == source_namespace
        })
        .filter(|tf| tf.status_or_default().last_attempted_revision != revision)
        .collect();

    let keys: Vec<ObjectKey> = affected.iter().map(|tf| ObjectKey::of(tf)).collect();
    let graph = DependencyGraph::from_resources(affected);
    match graph.topological_order(&keys) {
        Ok(ordered) => ordered,
        Err(e) => {
            error!(error = %e, "Failed to sort dependencies for revision change");
            Vec::new()
        }
    }
}
