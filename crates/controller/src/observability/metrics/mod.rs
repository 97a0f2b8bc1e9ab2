//! # Metrics Module
//!
//! Prometheus metrics for monitoring the controller, organized by responsibility.
//!
//! ## Sub-modules
//!
//! - `registry` - Metrics registry setup, registration and text encoding
//! - `controller_metrics` - Reconciliation metrics (passes, errors, requeues, in-flight work)
//! - `runner_metrics` - Runner pod and artifact metrics

pub mod controller_metrics;
pub mod registry;
pub mod runner_metrics;

pub use controller_metrics::*;
pub use registry::*;
pub use runner_metrics::*;
