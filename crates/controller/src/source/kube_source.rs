//! Reads artifacts from Flux source objects via the dynamic API.

use super::{ArtifactDescriptor, SourceError, SourceProvider, SOURCE_API_GROUP};
use crate::crd::SourceKind;
use async_trait::async_trait;
use kube::api::{Api, ApiResource};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::Client;
use tracing::debug;

#[derive(Clone)]
pub struct KubeSourceProvider {
    client: Client,
}

impl KubeSourceProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// API resource for a Flux source kind
pub fn source_api_resource(kind: SourceKind) -> ApiResource {
    let gvk = GroupVersionKind::gvk(SOURCE_API_GROUP, kind.api_version(), kind.as_str());
    ApiResource::from_gvk_with_plural(&gvk, kind.plural())
}

/// Extracts `status.artifact` from a source object
pub fn artifact_from_object(
    object: &DynamicObject,
) -> Result<Option<ArtifactDescriptor>, SourceError> {
    let Some(artifact) = object
        .data
        .get("status")
        .and_then(|status| status.get("artifact"))
    else {
        return Ok(None);
    };

    let field = |key: &str| artifact.get(key).and_then(|v| v.as_str());
    let url = field("url")
        .ok_or_else(|| SourceError::Invalid("artifact has no URL".to_string()))?
        .to_string();
    let revision = field("revision")
        .ok_or_else(|| SourceError::Invalid("artifact has no revision".to_string()))?
        .to_string();

    Ok(Some(ArtifactDescriptor {
        url,
        revision,
        digest: field("digest").map(str::to_string),
        size: artifact.get("size").and_then(|v| v.as_u64()),
    }))
}

#[async_trait]
impl SourceProvider for KubeSourceProvider {
    async fn artifact(
        &self,
        kind: SourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ArtifactDescriptor>, SourceError> {
        let resource = source_api_resource(kind);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);

        let object = match api.get(name).await {
            Ok(object) => object,
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                return Err(SourceError::NotFound {
                    kind,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(SourceError::Api(e)),
        };

        let artifact = artifact_from_object(&object)?;
        if artifact.is_none() {
            debug!("{} {}/{} has no artifact yet", kind, namespace, name);
        }
        Ok(artifact)
    }
}
