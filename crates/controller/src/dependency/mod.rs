//! # Dependency Resolution
//!
//! Terraform objects may depend on each other. Dependencies are modelled as
//! an explicit [`DependencyGraph`]; the finalizer strings written onto
//! dependencies ([`DependencyLock`]) are only the persisted encoding.

mod graph;
mod lock;
mod resolver;

pub use graph::{DependencyGraph, ObjectKey};
pub use lock::{blocking_dependents, DependencyLock};
pub use resolver::{
    check_dependencies, deletion_gate, release_locks, requests_for_revision_change,
    DeletionGate,
};

use crate::cluster::ClusterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DependencyError {
    /// Cross-namespace reference while those are disabled
    #[error("{0}")]
    AccessDenied(String),

    #[error("{0}")]
    NotReady(String),

    #[error("dependency cycle detected between {}", format_keys(.0))]
    Cycle(Vec<ObjectKey>),

    #[error(transparent)]
    Api(#[from] ClusterError),
}

fn format_keys(keys: &[ObjectKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
