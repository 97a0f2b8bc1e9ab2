//! # Artifact Fetch Tests
//!
//! Downloads source artifacts from a mock source controller.
//!
//! These tests verify:
//! - A tarball with a matching digest is extracted
//! - Digest mismatches and HTTP errors are reported
//! - The host override rewrites artifact URLs

mod common;

use common::*;
use controller::source::{ArtifactDescriptor, ArtifactError, ArtifactFetcher, HttpArtifactFetcher};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve_tarball(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/gitrepository/flux-system/infra/latest.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(module_tarball()))
        .mount(server)
        .await;
}

fn descriptor(base: &str) -> ArtifactDescriptor {
    ArtifactDescriptor {
        url: format!("{base}/gitrepository/flux-system/infra/latest.tar.gz"),
        ..artifact(REVISION)
    }
}

#[tokio::test]
async fn test_fetch_verifies_and_extracts() {
    let server = MockServer::start().await;
    serve_tarball(&server).await;
    let fetcher = HttpArtifactFetcher::new(None).unwrap();

    let fetched = fetcher.fetch(&descriptor(&server.uri())).await.unwrap();

    assert_eq!(fetched.revision, REVISION);
    assert_eq!(fetched.tarball, module_tarball());
    assert!(fetched.dir.path().join("main.tf").is_file());
}

#[tokio::test]
async fn test_fetch_rejects_digest_mismatch() {
    let server = MockServer::start().await;
    serve_tarball(&server).await;
    let fetcher = HttpArtifactFetcher::new(None).unwrap();
    let mut artifact = descriptor(&server.uri());
    artifact.digest = Some(sha256_digest(b"something else"));

    let err = fetcher.fetch(&artifact).await.unwrap_err();

    assert!(matches!(err, ArtifactError::ChecksumMismatch { .. }));
}

#[tokio::test]
async fn test_fetch_reports_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let fetcher = HttpArtifactFetcher::new(None).unwrap();

    let err = fetcher.fetch(&descriptor(&server.uri())).await.unwrap_err();

    assert!(matches!(err, ArtifactError::HttpStatus { status: 404, .. }));
}

#[tokio::test]
async fn test_host_override_rewrites_url() {
    let server = MockServer::start().await;
    serve_tarball(&server).await;
    let fetcher = HttpArtifactFetcher::new(Some(server.address().to_string())).unwrap();

    let fetched = fetcher
        .fetch(&descriptor("http://source-controller.flux-system.svc.cluster.local"))
        .await
        .unwrap();

    assert!(fetched.dir.path().join("main.tf").is_file());
}
