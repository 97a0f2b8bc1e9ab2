//! [`ClusterClient`] backed by a real `kube::Client`.

use super::{ClusterClient, ClusterError};
use crate::constants::FIELD_MANAGER;
use crate::crd::{Terraform, TerraformStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, PropagationPolicy};
use kube::Client;
use tracing::debug;

#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn is_status(error: &kube::Error, code: u16) -> bool {
    matches!(error, kube::Error::Api(api_err) if api_err.code == code)
}

/// Turns 404 into `Ok(None)`
fn optional<T>(result: Result<T, kube::Error>) -> Result<Option<T>, ClusterError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if is_status(&e, 404) => Ok(None),
        Err(e) => Err(ClusterError::Api(e)),
    }
}

fn created(
    result: Result<impl Sized, kube::Error>,
    kind: &'static str,
    namespace: &str,
    name: &str,
) -> Result<(), ClusterError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_status(&e, 409) => Err(ClusterError::AlreadyExists {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }),
        Err(e) => Err(ClusterError::Api(e)),
    }
}

fn deleted(
    result: Result<impl Sized, kube::Error>,
    kind: &'static str,
    namespace: &str,
    name: &str,
) -> Result<(), ClusterError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_status(&e, 404) => Err(ClusterError::not_found(kind, namespace, name)),
        Err(e) => Err(ClusterError::Api(e)),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_terraform(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Terraform>, ClusterError> {
        let api: Api<Terraform> = Api::namespaced(self.client.clone(), namespace);
        optional(api.get(name).await)
    }

    async fn list_terraforms(&self) -> Result<Vec<Terraform>, ClusterError> {
        let api: Api<Terraform> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_terraform_status(
        &self,
        namespace: &str,
        name: &str,
        status: &TerraformStatus,
    ) -> Result<(), ClusterError> {
        let api: Api<Terraform> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        match api
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => {
                // Resource was deleted during reconciliation
                debug!(
                    "Terraform {}/{} was deleted during reconciliation, skipping status update",
                    namespace, name
                );
                Ok(())
            }
            Err(e) => Err(ClusterError::Api(e)),
        }
    }

    async fn patch_terraform_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<(), ClusterError> {
        let api: Api<Terraform> = Api::namespaced(self.client.clone(), namespace);
        // A resourceVersion in a merge patch makes the API server reject stale writes with 409
        let mut metadata = serde_json::json!({ "finalizers": finalizers });
        if let Some(version) = resource_version {
            metadata["resourceVersion"] = serde_json::Value::from(version);
        }
        let patch = serde_json::json!({ "metadata": metadata });
        match api
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(ClusterError::not_found("Terraform", namespace, name)),
            Err(e) if is_status(&e, 409) => Err(ClusterError::Conflict {
                kind: "Terraform",
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(ClusterError::Api(e)),
        }
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        optional(api.get(name).await)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<(), ClusterError> {
        let namespace = pod
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| ClusterError::Invalid("pod has no namespace".to_string()))?;
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        created(api.create(&PostParams::default(), pod).await, "Pod", namespace, name)
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: i64,
    ) -> Result<(), ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = DeleteParams {
            grace_period_seconds: Some(u32::try_from(grace_period_seconds.max(0)).unwrap_or(0)),
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..DeleteParams::default()
        };
        deleted(api.delete(name, &params).await, "Pod", namespace, name)
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        optional(api.get(name).await)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), ClusterError> {
        let namespace = secret
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| ClusterError::Invalid("secret has no namespace".to_string()))?;
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        created(
            api.create(&PostParams::default(), secret).await,
            "Secret",
            namespace,
            name,
        )
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, ClusterError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        optional(api.get(name).await)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        deleted(
            api.delete(name, &DeleteParams::default()).await,
            "Secret",
            namespace,
            name,
        )
    }

    async fn list_secrets(&self, label_selector: &str) -> Result<Vec<Secret>, ClusterError> {
        let api: Api<Secret> = Api::all(self.client.clone());
        Ok(api
            .list(&ListParams::default().labels(label_selector))
            .await?
            .items)
    }
}
