//! # Health Check Tests
//!
//! Runs reconcile passes whose applies are followed by health checks against
//! addresses taken from the outputs secret.
//!
//! These tests verify:
//! - A passing HTTP check records HealthCheck=True after the apply
//! - A failing HTTP check records HealthCheck=False and counts as a failure
//! - A failed check is repeated on the next pass even without drift
//! - TCP checks connect to the rendered address
//! - Checks do not run without a successful apply

mod common;

use common::*;
use controller::crd::{
    ConditionStatus, ConditionType, HealthCheck, HealthCheckType, WriteOutputsToSecretSpec,
};
use kube::runtime::controller::Action;
use runner_proto::OutputMeta;
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn string_output(value: &str) -> OutputMeta {
    OutputMeta {
        sensitive: false,
        r#type: br#""string""#.to_vec(),
        value: serde_json::to_vec(value).unwrap(),
    }
}

fn script(outputs: &[(&str, &str)]) -> RunnerScript {
    RunnerScript {
        outputs: outputs
            .iter()
            .map(|(name, value)| (name.to_string(), string_output(value)))
            .collect::<HashMap<_, _>>(),
        ..RunnerScript::default()
    }
}

fn checked(name: &str, check: HealthCheck) -> controller::Terraform {
    let mut tf = terraform(name, "auto");
    tf.spec.write_outputs_to_secret = Some(WriteOutputsToSecretSpec {
        name: format!("{name}-outputs"),
        ..WriteOutputsToSecretSpec::default()
    });
    tf.spec.health_checks = vec![check];
    tf
}

fn http_check(url: &str) -> HealthCheck {
    HealthCheck {
        name: "api".to_string(),
        check_type: HealthCheckType::HttpGet,
        url: url.to_string(),
        timeout: Some("5s".to_string()),
        ..HealthCheck::default()
    }
}

fn health_condition(harness: &Harness, name: &str) -> (String, Option<String>) {
    let condition = harness
        .cluster
        .status(name)
        .condition_of(ConditionType::HealthCheck)
        .cloned()
        .expect("health check condition should be set");
    (condition.status, condition.reason)
}

/// Moves the last plan far enough into the past for the interval gate to open
fn expire_interval(harness: &Harness, name: &str) {
    let mut tf = harness.cluster.terraform(name).unwrap();
    if let Some(status) = tf.status.as_mut() {
        status.last_plan_at = Some("2020-01-01T00:00:00Z".to_string());
    }
    harness.cluster.insert_terraform(tf);
}

#[tokio::test]
async fn test_http_check_passes_after_apply() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/healthz"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new(script(&[("endpoint", &server.uri())]));
    harness
        .cluster
        .insert_terraform(checked("infra", http_check("${{ .endpoint }}/healthz")));

    let action = harness.reconcile("infra").await.unwrap();

    assert_eq!(action, Action::requeue(Duration::from_secs(60)));
    assert_eq!(
        health_condition(&harness, "infra"),
        (
            ConditionStatus::True.as_str().to_string(),
            Some("HealthChecksSucceed".to_string())
        )
    );
    let status = harness.cluster.status("infra");
    assert!(status.is_ready());
    assert_eq!(status.reconciliation_failures, 0);
}

#[tokio::test]
async fn test_failed_http_check_is_retried_on_next_pass() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/healthz"))
        .respond_with(ResponseTemplate::new(503).set_body_string("warming up"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/healthz"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = Harness::new(script(&[("endpoint", &server.uri())]));
    harness
        .cluster
        .insert_terraform(checked("infra", http_check("${{ .endpoint }}/healthz")));

    let action = harness.reconcile("infra").await.unwrap();

    assert_ne!(action, Action::requeue(Duration::from_secs(60)));
    let status = harness.cluster.status("infra");
    assert_eq!(status.reconciliation_failures, 1);
    let condition = status.condition_of(ConditionType::HealthCheck).unwrap();
    assert_eq!(condition.status, ConditionStatus::False.as_str());
    assert_eq!(condition.reason.as_deref(), Some("HealthChecksFailed"));
    assert!(condition.message.as_deref().unwrap().contains("warming up"));
    assert!(status.condition_is(ConditionType::Apply, ConditionStatus::True));

    harness.runner.script.lock().unwrap().plan_drifted = false;
    expire_interval(&harness, "infra");
    harness.runner.clear_calls();
    harness.reconcile("infra").await.unwrap();

    assert!(!harness.runner.called("Apply"));
    assert!(harness.runner.called("Output"));
    assert_eq!(
        health_condition(&harness, "infra"),
        (
            ConditionStatus::True.as_str().to_string(),
            Some("HealthChecksSucceed".to_string())
        )
    );
    assert_eq!(harness.cluster.status("infra").reconciliation_failures, 0);
}

#[tokio::test]
async fn test_passed_checks_are_not_repeated_without_apply() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/healthz"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new(script(&[("endpoint", &server.uri())]));
    harness
        .cluster
        .insert_terraform(checked("infra", http_check("${{ .endpoint }}/healthz")));
    harness.reconcile("infra").await.unwrap();

    harness.runner.script.lock().unwrap().plan_drifted = false;
    expire_interval(&harness, "infra");
    harness.reconcile("infra").await.unwrap();

    assert_eq!(
        health_condition(&harness, "infra").1.as_deref(),
        Some("HealthChecksSucceed")
    );
}

#[tokio::test]
async fn test_tcp_check_uses_rendered_address() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port().to_string();

    let harness = Harness::new(script(&[("host", "127.0.0.1"), ("port", &port)]));
    harness.cluster.insert_terraform(checked(
        "infra",
        HealthCheck {
            name: "db".to_string(),
            check_type: HealthCheckType::Tcp,
            address: "${{ .host }}:${{ .port }}".to_string(),
            timeout: Some("2s".to_string()),
            ..HealthCheck::default()
        },
    ));

    harness.reconcile("infra").await.unwrap();

    assert_eq!(
        health_condition(&harness, "infra").0,
        ConditionStatus::True.as_str()
    );
}

#[tokio::test]
async fn test_checks_skipped_until_apply_succeeds() {
    let harness = Harness::new(RunnerScript {
        apply_error: Some(tonic::Status::internal("provider crashed")),
        ..script(&[("endpoint", "http://127.0.0.1:1")])
    });
    harness
        .cluster
        .insert_terraform(checked("infra", http_check("${{ .endpoint }}/healthz")));

    harness.reconcile("infra").await.unwrap();

    let status = harness.cluster.status("infra");
    assert!(status.condition_of(ConditionType::HealthCheck).is_none());
    assert!(!status.is_ready());
}
