//! # Error Policy
//!
//! Requeue decisions for reconcile passes that returned an error. Uses the
//! same class-to-requeue mapping as the reconciler itself.

use crate::controller::reconciler::{requeue_action, Reconciler, ReconcilerError};
use crate::crd::Terraform;
use crate::observability;
use kube_runtime::controller::Action;
use std::sync::Arc;
use tracing::{error, info};

pub fn handle_reconciliation_error(
    obj: Arc<Terraform>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.name();
    let namespace = obj.namespace_or_default();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = name,
        resource.namespace = namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}/{}: {}", namespace, name, error);
    observability::metrics::increment_reconciliation_errors();

    let class = error.classify();
    let action = requeue_action(class, &obj, &ctx.config);
    info!(retry_class = class.as_str(), action = ?action, "Requeueing after error");
    observability::metrics::increment_requeues_total(class.as_str());
    action
}
