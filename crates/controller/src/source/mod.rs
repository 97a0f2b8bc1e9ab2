//! # Source Artifacts
//!
//! Resolves Flux source references to artifact descriptors and fetches the
//! verified artifact contents.

mod artifact;
mod kube_source;

pub use artifact::{
    extract_tarball, verify_and_extract, verify_digest, ArtifactError, ArtifactFetcher,
    FetchedArtifact, HttpArtifactFetcher,
};
pub use kube_source::{artifact_from_object, source_api_resource, KubeSourceProvider};

use crate::crd::{SourceKind, SourceRef};
use async_trait::async_trait;
use thiserror::Error;

pub const SOURCE_API_GROUP: &str = "source.toolkit.fluxcd.io";

/// The artifact a source currently serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub url: String,
    pub revision: String,
    /// `algorithm:hex`, e.g. `sha256:...`
    pub digest: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: SourceKind,
        namespace: String,
        name: String,
    },

    #[error("cannot access {kind} {namespace}/{name}, cross-namespace references have been disabled")]
    AccessDenied {
        kind: SourceKind,
        namespace: String,
        name: String,
    },

    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("invalid source object: {0}")]
    Invalid(String),
}

/// Looks up the artifact a Flux source serves
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// `Ok(None)` when the source exists but has not produced an artifact yet
    async fn artifact(
        &self,
        kind: SourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ArtifactDescriptor>, SourceError>;
}

/// Namespace the source lives in, enforcing the cross-namespace restriction
pub fn resolve_source_namespace<'a>(
    source_ref: &'a SourceRef,
    owner_namespace: &'a str,
    no_cross_namespace_refs: bool,
) -> Result<&'a str, SourceError> {
    let namespace = source_ref.namespace_or(owner_namespace);
    if no_cross_namespace_refs && namespace != owner_namespace {
        return Err(SourceError::AccessDenied {
            kind: source_ref.kind,
            namespace: namespace.to_string(),
            name: source_ref.name.clone(),
        });
    }
    Ok(namespace)
}
