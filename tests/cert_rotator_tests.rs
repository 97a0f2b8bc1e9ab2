//! # Certificate Rotator Tests
//!
//! These tests verify:
//! - The rotator becomes ready with a valid CA
//! - Namespace bundles are cached until the CA changes
//! - Bundles survive a secret round trip
//! - Expired runner TLS secrets are garbage collected on each check

mod common;

use common::*;
use controller::certs::{CertRotator, NamespaceTls};
use controller::cluster::ClusterClient;
use controller::config::CertRotationConfig;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_rotator_ready_with_valid_ca() {
    let certs = spawn_rotator(FakeCluster::new());

    certs.wait_ready().await.unwrap();

    assert!(certs.is_ready());
    assert!(certs.is_ca_valid());
}

#[tokio::test]
async fn test_namespace_bundle_is_cached() {
    let certs = spawn_rotator(FakeCluster::new());

    let first = certs.namespace_tls(NAMESPACE).await.unwrap();
    let second = certs.namespace_tls(NAMESPACE).await.unwrap();
    let other = certs.namespace_tls("team-a").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.namespace, NAMESPACE);
    assert_ne!(first.cert_pem, other.cert_pem);
    assert_eq!(first.ca_cert_pem, other.ca_cert_pem);
}

#[tokio::test]
async fn test_secret_name_encodes_expiry() {
    let certs = spawn_rotator(FakeCluster::new());

    let tls = certs.namespace_tls(NAMESPACE).await.unwrap();

    assert_eq!(tls.secret_name, NamespaceTls::secret_name_for(tls.valid_until));
    assert_eq!(
        NamespaceTls::valid_until_from_secret_name(&tls.secret_name),
        Some(tls.valid_until)
    );
    assert!(tls.valid_until > chrono::Utc::now().timestamp());
}

#[tokio::test]
async fn test_bundle_secret_round_trip() {
    let certs = spawn_rotator(FakeCluster::new());
    let tls = certs.namespace_tls(NAMESPACE).await.unwrap();

    let restored = NamespaceTls::from_secret(&tls.to_secret()).unwrap();

    assert_eq!(restored, tls);
}

#[tokio::test]
async fn test_rotate_keeps_valid_ca() {
    let certs = spawn_rotator(FakeCluster::new());
    let before = certs.namespace_tls(NAMESPACE).await.unwrap();

    certs.rotate_ca().await.unwrap();
    let after = certs.namespace_tls(NAMESPACE).await.unwrap();

    assert_eq!(before.ca_cert_pem, after.ca_cert_pem);
}

#[tokio::test]
async fn test_expired_secrets_are_collected() {
    let cluster = FakeCluster::new();
    let stale = NamespaceTls {
        namespace: NAMESPACE.to_string(),
        secret_name: NamespaceTls::secret_name_for(1_000),
        ca_cert_pem: "ca".to_string(),
        ca_key_pem: "ca-key".to_string(),
        cert_pem: "cert".to_string(),
        key_pem: "key".to_string(),
        valid_until: 1_000,
    };
    cluster.insert_secret(stale.to_secret());

    let (certs, _task) = CertRotator::spawn(
        Arc::clone(&cluster) as Arc<dyn ClusterClient>,
        CertRotationConfig {
            rotation_check_frequency: Duration::from_millis(20),
            ..CertRotationConfig::default()
        },
        "cluster.local".to_string(),
        false,
    );
    let live = certs.namespace_tls(NAMESPACE).await.unwrap();
    cluster.insert_secret(live.to_secret());

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(cluster.secret_names(), vec![live.secret_name]);
    assert!(cluster
        .writes()
        .contains(&ClusterWrite::SecretDeleted(stale.secret_name)));
}
