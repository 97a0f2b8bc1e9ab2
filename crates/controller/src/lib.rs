//! Terraform Controller Library
//!
//! Core functionality of the Terraform controller: the `Terraform` custom
//! resource, the reconciliation engine, runner pod orchestration, dependency
//! resolution and graceful shutdown.
//! Tests live next to the code in each module and in the workspace `tests/`.

pub mod certs;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod dependency;
pub mod observability;
pub mod policy;
pub mod runner;
pub mod runtime;
pub mod shutdown;
pub mod source;

// Re-export CRD types for convenience
pub use crd::*;
