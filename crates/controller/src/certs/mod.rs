//! # Runner Certificates
//!
//! A single actor owns the runner CA and every per-namespace TLS bundle.
//! Callers talk to it through [`CertRotatorHandle`] and never mutate
//! certificate state directly.

mod pki;
mod rotator;

pub use pki::{NamespaceTls, RunnerCa};
pub use rotator::{CertRotator, CertRotatorHandle};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("failed to generate key pair: {0}")]
    KeyGeneration(String),

    #[error("failed to generate certificate: {0}")]
    Generation(String),

    #[error("invalid TLS secret {name}: {reason}")]
    InvalidSecret { name: String, reason: String },

    #[error("no valid CA is available")]
    NoCa,

    #[error("certificate rotator is not running")]
    RotatorStopped,
}
