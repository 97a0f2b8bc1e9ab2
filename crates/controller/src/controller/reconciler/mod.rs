//! # Reconciler
//!
//! Drives Terraform objects through source resolution, dependency gating,
//! runner acquisition, drift detection, planning, apply and output
//! publication.
//!
//! ## Sub-modules
//!
//! - `types` - Shared context, error taxonomy and requeue mapping
//! - `reconcile` - The pass itself
//! - `status` - Status persistence
//! - `workspace` - Artifact upload and Terraform initialisation on the runner
//! - `inputs` - Backend configuration and input variables
//! - `drift` - Drift detection
//! - `plan` - Planning and post-planning webhooks
//! - `apply` - Applying the pending plan
//! - `outputs` - Output discovery and the outputs secret
//! - `health` - Post-apply health checks
//! - `finalize` - Deletion handling

mod apply;
mod drift;
mod finalize;
mod health;
mod inputs;
mod outputs;
mod plan;
mod reconcile;
mod status;
mod types;
mod workspace;

pub use health::{run_health_checks, validate_tcp_address, HealthCheckError};
pub use inputs::{backend_config, parse_rename_pattern, resolve_vars, InputError};
pub use outputs::{output_secret_data, OutputError};
pub use reconcile::reconcile;
pub use types::{requeue_action, Reconciler, ReconcilerError, RetryClass};
