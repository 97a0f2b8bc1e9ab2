//! # Watch Loop
//!
//! Runs the Terraform controller. Besides Terraform objects it watches:
//!
//! - runner pods (by label), mapped back to their Terraform object by name
//! - Flux sources, fanning a revision change out to every dependent object in
//!   dependency order
//!
//! On SIGTERM or Ctrl-C the shutdown coordinator stops admitting passes and
//! waits for in-flight ones, bounded by the configured timeout.

use super::error_policy::handle_reconciliation_error;
use super::initialization::InitializationResult;
use crate::constants::{RUNNER_LABEL, RUNNER_POD_NAME_SUFFIX, WATCH_TIMEOUT_SECS};
use crate::controller::reconciler::reconcile;
use crate::crd::{SourceKind, Terraform};
use crate::dependency::requests_for_revision_change;
use crate::source::{artifact_from_object, source_api_resource};
use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::core::DynamicObject;
use kube::runtime::controller::{Config as ControllerConfig, Controller};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::ResourceExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub async fn run_watch_loop(init: InitializationResult) -> Result<()> {
    let InitializationResult {
        client,
        reconciler,
        rotator_task,
        ..
    } = init;

    let watcher_config = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    let terraforms: Api<Terraform> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client.clone());

    let mut controller = Controller::new(terraforms, watcher_config())
        .with_config(ControllerConfig::default().concurrency(reconciler.config.concurrent_reconciles))
        .watches(pods, watcher_config().labels(RUNNER_LABEL), runner_pod_owner);

    let store = controller.store();
    for kind in SourceKind::all() {
        let resource = source_api_resource(kind);
        let sources: Api<DynamicObject> = Api::all_with(client.clone(), &resource);
        let store = store.clone();
        controller = controller.watches_with(sources, resource, watcher_config(), move |source| {
            source_revision_requests(kind, &store, &source)
        });
    }

    let stop = CancellationToken::new();
    tokio::spawn({
        let stop = stop.clone();
        async move {
            wait_for_shutdown_signal().await;
            info!("Shutdown signal received");
            stop.cancel();
        }
    });
    let drain = tokio::spawn({
        let shutdown = Arc::clone(&reconciler.shutdown);
        let stop = stop.clone();
        async move {
            stop.cancelled().await;
            shutdown.shutdown().await
        }
    });

    info!("Watching Terraform objects, runner pods and Flux sources");
    controller
        .graceful_shutdown_on(async move { stop.cancelled().await })
        .run(reconcile, handle_reconciliation_error, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((object, _action)) => debug!(resource = %object, "Reconciled"),
                Err(e) => warn!(error = %e, "Controller event error"),
            }
        })
        .await;

    let outcome = drain.await?;
    info!(?outcome, "Controller stopped");
    rotator_task.abort();
    Ok(())
}

/// Runner pods carry no owner reference; their name encodes the object
fn runner_pod_owner(pod: Pod) -> Option<ObjectRef<Terraform>> {
    let name = pod.name_any().strip_suffix(RUNNER_POD_NAME_SUFFIX)?.to_string();
    let namespace = pod.namespace()?;
    Some(ObjectRef::new(&name).within(&namespace))
}

fn source_revision_requests(
    kind: SourceKind,
    store: &Store<Terraform>,
    source: &DynamicObject,
) -> Vec<ObjectRef<Terraform>> {
    let artifact = match artifact_from_object(source) {
        Ok(Some(artifact)) => artifact,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!(source = %source.name_any(), error = %e, "Ignoring source with an invalid artifact");
            return Vec::new();
        }
    };
    let candidates: Vec<Terraform> = store.state().iter().map(|tf| Terraform::clone(tf)).collect();
    let namespace = source.namespace().unwrap_or_default();
    requests_for_revision_change(kind, &namespace, &source.name_any(), &artifact.revision, &candidates)
        .into_iter()
        .map(|key| ObjectRef::new(&key.name).within(&key.namespace))
        .collect()
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler, using Ctrl-C only"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    #[test]
    fn test_runner_pod_owner() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("helloworld-tf-runner".to_string()),
                namespace: Some("flux-system".to_string()),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        };
        let owner = runner_pod_owner(pod).unwrap();
        assert_eq!(owner.name, "helloworld");
        assert_eq!(owner.namespace.as_deref(), Some("flux-system"));

        let other = Pod {
            metadata: ObjectMeta {
                name: Some("unrelated".to_string()),
                namespace: Some("flux-system".to_string()),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        };
        assert!(runner_pod_owner(other).is_none());
    }
}
