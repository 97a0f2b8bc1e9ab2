//! # Runner Orchestration Tests
//!
//! Exercises the runner provisioning protocol against an in-memory cluster.
//!
//! These tests verify:
//! - A missing pod is created with the current TLS secret label
//! - Stale and foreign pods are replaced with the right grace period
//! - Terminating pods are awaited, and the wait honours cancellation
//! - A pod that never gets an IP is force deleted
//! - Hostname selection for pod IP, subdomain and local runners
//! - Session close removes the pod only when asked

mod common;

use common::*;
use controller::cluster::ClusterClient;
use controller::config::RunnerConfig;
use controller::constants::RUNNER_TLS_SECRET_LABEL;
use controller::runner::{runner_pod, RunnerDialer, RunnerError, RunnerOrchestrator};
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Fixture {
    cluster: Arc<FakeCluster>,
    dialer: Arc<FakeDialer>,
    orchestrator: RunnerOrchestrator,
}

fn fixture(config: RunnerConfig) -> Fixture {
    let cluster = FakeCluster::new();
    let dialer = FakeDialer::new(FakeRunner::new(RunnerScript::default()));
    let certs = spawn_rotator(Arc::clone(&cluster));
    let orchestrator = RunnerOrchestrator::new(
        Arc::clone(&cluster) as Arc<dyn ClusterClient>,
        certs,
        Arc::clone(&dialer) as Arc<dyn RunnerDialer>,
        config,
    );
    Fixture {
        cluster,
        dialer,
        orchestrator,
    }
}

/// A running pod built from the real template, labelled with `tls_secret`
fn live_pod(tls_secret: Option<&str>) -> Pod {
    let tf = terraform("infra", "auto");
    let mut pod = runner_pod(&tf, &fast_runner_config(), "placeholder", REVISION).unwrap();
    let labels = pod.metadata.labels.get_or_insert_with(Default::default);
    match tls_secret {
        Some(name) => {
            labels.insert(RUNNER_TLS_SECRET_LABEL.to_string(), name.to_string());
        }
        None => {
            labels.remove(RUNNER_TLS_SECRET_LABEL);
        }
    }
    pod.status = Some(PodStatus {
        phase: Some("Running".to_string()),
        pod_ip: Some("10.0.0.7".to_string()),
        ..PodStatus::default()
    });
    pod
}

fn pod_writes(cluster: &FakeCluster) -> Vec<ClusterWrite> {
    cluster
        .writes()
        .into_iter()
        .filter(|w| matches!(w, ClusterWrite::PodCreated(_) | ClusterWrite::PodDeleted(..)))
        .collect()
}

#[tokio::test]
async fn test_acquire_creates_pod_and_tls_secret() {
    let f = fixture(fast_runner_config());
    let tf = terraform("infra", "auto");

    let session = f
        .orchestrator
        .acquire(&tf, REVISION, &CancellationToken::new())
        .await
        .unwrap();

    let secrets = f.cluster.secret_names();
    assert_eq!(secrets.len(), 1);
    let pod = f.cluster.pod("infra-tf-runner").unwrap();
    let labels = pod.metadata.labels.unwrap();
    assert_eq!(labels.get(RUNNER_TLS_SECRET_LABEL), Some(&secrets[0]));
    assert_eq!(
        labels.get("app.kubernetes.io/instance").map(String::as_str),
        Some("tf-runner-b8e362c2")
    );
    assert_eq!(
        f.dialer.targets()[0].host,
        "10-0-0-12.flux-system.pod.cluster.local"
    );

    session.close(false, &CancellationToken::new()).await;
    assert!(f.cluster.pod("infra-tf-runner").is_some());
}

#[tokio::test]
async fn test_running_pod_with_current_secret_is_reused() {
    let f = fixture(fast_runner_config());
    let tf = terraform("infra", "auto");
    let first = f
        .orchestrator
        .acquire(&tf, REVISION, &CancellationToken::new())
        .await
        .unwrap();
    first.close(false, &CancellationToken::new()).await;

    let second = f
        .orchestrator
        .acquire(&tf, REVISION, &CancellationToken::new())
        .await
        .unwrap();
    second.close(false, &CancellationToken::new()).await;

    assert_eq!(
        pod_writes(&f.cluster),
        vec![ClusterWrite::PodCreated("infra-tf-runner".to_string())]
    );
    assert_eq!(f.dialer.targets().len(), 2);
}

#[tokio::test]
async fn test_stale_pod_replaced_with_spec_grace_period() {
    let f = fixture(fast_runner_config());
    f.cluster
        .insert_pod(live_pod(Some("terraform-runner.tls-1000")));
    f.cluster.set_terminating_reads(2);
    let mut tf = terraform("infra", "auto");
    tf.spec.runner_termination_grace_period_seconds = Some(45);

    let session = f
        .orchestrator
        .acquire(&tf, REVISION, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        pod_writes(&f.cluster),
        vec![
            ClusterWrite::PodDeleted("infra-tf-runner".to_string(), 45),
            ClusterWrite::PodCreated("infra-tf-runner".to_string()),
        ]
    );
    session.close(true, &CancellationToken::new()).await;
    assert!(f.cluster.pod("infra-tf-runner").is_none());
}

#[tokio::test]
async fn test_foreign_pod_is_force_deleted() {
    let f = fixture(fast_runner_config());
    f.cluster.insert_pod(live_pod(None));

    f.orchestrator
        .acquire(&terraform("infra", "auto"), REVISION, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        pod_writes(&f.cluster)[0],
        ClusterWrite::PodDeleted("infra-tf-runner".to_string(), 1)
    );
}

#[tokio::test]
async fn test_termination_wait_is_cancellable() {
    let f = fixture(fast_runner_config());
    f.cluster
        .insert_pod(live_pod(Some("terraform-runner.tls-1000")));
    f.cluster.set_terminating_reads(usize::MAX);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = f
        .orchestrator
        .acquire(&terraform("infra", "auto"), REVISION, &cancel)
        .await;

    assert!(matches!(result, Err(RunnerError::Cancelled)));
    assert!(f.dialer.targets().is_empty());
}

#[tokio::test]
async fn test_termination_wait_times_out() {
    let f = fixture(RunnerConfig {
        creation_timeout: std::time::Duration::from_millis(50),
        ..fast_runner_config()
    });
    f.cluster
        .insert_pod(live_pod(Some("terraform-runner.tls-1000")));
    f.cluster.set_terminating_reads(usize::MAX);

    let result = f
        .orchestrator
        .acquire(&terraform("infra", "auto"), REVISION, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(RunnerError::TerminationTimeout { .. })));
}

#[tokio::test]
async fn test_pod_without_ip_is_force_deleted() {
    let f = fixture(RunnerConfig {
        creation_timeout: std::time::Duration::from_millis(50),
        ..fast_runner_config()
    });
    f.cluster.withhold_pod_ip();

    let result = f
        .orchestrator
        .acquire(&terraform("infra", "auto"), REVISION, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(RunnerError::IpTimeout { .. })));
    assert_eq!(
        pod_writes(&f.cluster),
        [
            ClusterWrite::PodCreated("infra-tf-runner".to_string()),
            ClusterWrite::PodDeleted("infra-tf-runner".to_string(), 1),
        ]
    );
    assert!(f.dialer.targets().is_empty());
}

#[tokio::test]
async fn test_invalid_revision_leaves_existing_pod_alone() {
    let f = fixture(fast_runner_config());
    f.cluster
        .insert_pod(live_pod(Some("terraform-runner.tls-1000")));

    let result = f
        .orchestrator
        .acquire(&terraform("infra", "auto"), "main", &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(RunnerError::InvalidRevision(_))));
    assert!(pod_writes(&f.cluster).is_empty());
    assert!(f.cluster.pod("infra-tf-runner").is_some());
}

#[tokio::test]
async fn test_pod_subdomain_resolution_hostname() {
    let f = fixture(RunnerConfig {
        use_pod_subdomain_resolution: true,
        ..fast_runner_config()
    });

    f.orchestrator
        .acquire(&terraform("infra", "auto"), REVISION, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        f.dialer.targets()[0].host,
        "infra.tf-runner.flux-system.svc.cluster.local"
    );
}

#[tokio::test]
async fn test_local_runner_skips_pod_management() {
    let f = fixture(RunnerConfig {
        insecure_local_runner: true,
        ..fast_runner_config()
    });

    let session = f
        .orchestrator
        .acquire(&terraform("infra", "auto"), REVISION, &CancellationToken::new())
        .await
        .unwrap();
    session.close(true, &CancellationToken::new()).await;

    assert!(pod_writes(&f.cluster).is_empty());
    assert_eq!(f.dialer.targets()[0].host, "localhost");
}
