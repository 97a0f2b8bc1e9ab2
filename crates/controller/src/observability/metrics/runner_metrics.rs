//! # Runner Metrics
//!
//! Runner pod churn and artifact download metrics.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::IntCounter;
use std::sync::LazyLock;

static RUNNER_PODS_CREATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tf_controller_runner_pods_created_total",
        "Total number of runner pods created",
    )
    .expect("Failed to create RUNNER_PODS_CREATED_TOTAL metric - this should never happen")
});

static RUNNER_PODS_DELETED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tf_controller_runner_pods_deleted_total",
        "Total number of runner pods deleted",
    )
    .expect("Failed to create RUNNER_PODS_DELETED_TOTAL metric - this should never happen")
});

static ARTIFACT_DOWNLOADS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tf_controller_artifact_downloads_total",
        "Total number of source artifact downloads",
    )
    .expect("Failed to create ARTIFACT_DOWNLOADS_TOTAL metric - this should never happen")
});

static ARTIFACT_CHECKSUM_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tf_controller_artifact_checksum_failures_total",
        "Total number of artifacts rejected for a checksum mismatch",
    )
    .expect("Failed to create ARTIFACT_CHECKSUM_FAILURES_TOTAL metric - this should never happen")
});

pub(crate) fn register_runner_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RUNNER_PODS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RUNNER_PODS_DELETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ARTIFACT_DOWNLOADS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ARTIFACT_CHECKSUM_FAILURES_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_runner_pods_created() {
    RUNNER_PODS_CREATED_TOTAL.inc();
}

pub fn increment_runner_pods_deleted() {
    RUNNER_PODS_DELETED_TOTAL.inc();
}

pub fn increment_artifact_downloads() {
    ARTIFACT_DOWNLOADS_TOTAL.inc();
}

pub fn increment_artifact_checksum_failures() {
    ARTIFACT_CHECKSUM_FAILURES_TOTAL.inc();
}
