//! # Custom Resource Definitions
//!
//! The `Terraform` resource (`infra.contrib.fluxcd.io/v1alpha2`) and its
//! supporting types.

mod conditions;
mod plan_id;
mod status;

pub use conditions::*;
pub use plan_id::{approve_message, plan_id};
pub use status::*;

use crate::constants::{DEFAULT_INTERVAL, DEFAULT_RUNNER_SERVICE_ACCOUNT, DEFAULT_WORKSPACE};
use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvFromSource, EnvVar, HostAlias, ResourceRequirements, SecurityContext,
    Toleration, Volume, VolumeMount,
};
use kube::CustomResource;
use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Terraform Custom Resource Definition
///
/// Declares a Terraform module sourced from a Flux artifact and how it should
/// be planned, approved and applied.
///
/// # Example
///
/// ```yaml
/// apiVersion: infra.contrib.fluxcd.io/v1alpha2
/// kind: Terraform
/// metadata:
///   name: helloworld
///   namespace: flux-system
/// spec:
///   interval: 1m
///   approvePlan: auto
///   path: ./terraform
///   sourceRef:
///     kind: GitRepository
///     name: helloworld
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Terraform",
    group = "infra.contrib.fluxcd.io",
    version = "v1alpha2",
    namespaced,
    status = "TerraformStatus",
    shortname = "tf",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Status", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].message"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TerraformSpec {
    /// `""` waits for manual approval, `"auto"` applies every plan, `"disable"`
    /// only detects drift, a plan id approves that plan and `"re<plan id>"`
    /// discards the pending plan.
    #[serde(default)]
    pub approve_plan: String,
    /// Plan a destroy instead of an apply
    #[serde(default)]
    pub destroy: bool,
    /// Destroy the provisioned resources when the object is deleted
    #[serde(default)]
    pub destroy_resources_on_deletion: bool,
    /// Time between periodic reconciliations
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Time to wait before retrying a failed reconciliation. Defaults to 15s.
    #[serde(default)]
    pub retry_interval: Option<String>,
    #[serde(default)]
    pub retry_strategy: RetryStrategy,
    /// Upper bound for exponential backoff. Defaults to 24h.
    #[serde(default)]
    pub max_retry_interval: Option<String>,
    /// Path of the module inside the source artifact
    #[serde(default = "default_path")]
    pub path: String,
    pub source_ref: SourceRef,
    #[serde(default)]
    pub suspend: bool,
    /// Plan and apply even when nothing changed
    #[serde(default)]
    pub force: bool,
    /// Stop after planning; never apply
    #[serde(default)]
    pub plan_only: bool,
    #[serde(default)]
    pub disable_drift_detection: bool,
    #[serde(default)]
    pub refresh_before_apply: bool,
    #[serde(default)]
    pub upgrade_on_init: bool,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default)]
    pub write_outputs_to_secret: Option<WriteOutputsToSecretSpec>,
    /// Other Terraform objects that must be Ready before this one is planned
    #[serde(default)]
    pub depends_on: Vec<NamespacedObjectReference>,
    #[serde(default)]
    pub remediation: Option<Remediation>,
    #[serde(default)]
    pub webhooks: Vec<Webhook>,
    #[serde(default = "default_service_account_name")]
    pub service_account_name: String,
    /// Delete the runner pod after every pass. Defaults to true.
    #[serde(default)]
    pub always_cleanup_runner_pod: Option<bool>,
    #[serde(default)]
    pub runner_termination_grace_period_seconds: Option<i64>,
    #[serde(default)]
    pub runner_pod_template: Option<RunnerPodTemplate>,
    /// Input variables written to `generated.auto.tfvars.json`
    #[serde(default)]
    pub vars: Vec<Variable>,
    /// Secrets and ConfigMaps whose keys become variables. Later entries win
    /// over earlier ones and over `vars`.
    #[serde(default)]
    pub vars_from: Vec<VarsReference>,
    #[serde(default)]
    pub backend_config: Option<BackendConfigSpec>,
    /// Secret holding a Terraform CLI configuration file
    #[serde(default)]
    pub cli_config_secret_ref: Option<SecretReference>,
    #[serde(default)]
    pub health_checks: Vec<HealthCheck>,
    #[serde(default, rename = "tfstate")]
    pub tf_state: Option<TfStateSpec>,
    #[serde(default)]
    pub store_readable_plan: ReadablePlan,
}

impl Default for TerraformSpec {
    fn default() -> Self {
        Self {
            approve_plan: String::new(),
            destroy: false,
            destroy_resources_on_deletion: false,
            interval: default_interval(),
            retry_interval: None,
            retry_strategy: RetryStrategy::default(),
            max_retry_interval: None,
            path: default_path(),
            source_ref: SourceRef::default(),
            suspend: false,
            force: false,
            plan_only: false,
            disable_drift_detection: false,
            refresh_before_apply: false,
            upgrade_on_init: false,
            targets: Vec::new(),
            workspace: default_workspace(),
            write_outputs_to_secret: None,
            depends_on: Vec::new(),
            remediation: None,
            webhooks: Vec::new(),
            service_account_name: default_service_account_name(),
            always_cleanup_runner_pod: None,
            runner_termination_grace_period_seconds: None,
            runner_pod_template: None,
            vars: Vec::new(),
            vars_from: Vec::new(),
            backend_config: None,
            cli_config_secret_ref: None,
            health_checks: Vec::new(),
            tf_state: None,
            store_readable_plan: ReadablePlan::default(),
        }
    }
}

fn default_interval() -> String {
    DEFAULT_INTERVAL.to_string()
}

fn default_path() -> String {
    ".".to_string()
}

fn default_workspace() -> String {
    DEFAULT_WORKSPACE.to_string()
}

fn default_service_account_name() -> String {
    DEFAULT_RUNNER_SERVICE_ACCOUNT.to_string()
}

fn default_true() -> bool {
    true
}

/// Reference to a Flux source, optionally in another namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    #[serde(default)]
    pub kind: SourceKind,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl SourceRef {
    /// Namespace of the source, defaulting to the referencing object's namespace
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default)
    }
}

/// Flux source kinds that produce a Terraform artifact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum SourceKind {
    #[default]
    GitRepository,
    Bucket,
    #[serde(rename = "OCIRepository")]
    OciRepository,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::GitRepository => "GitRepository",
            SourceKind::Bucket => "Bucket",
            SourceKind::OciRepository => "OCIRepository",
        }
    }

    /// API version the source controller serves this kind under
    pub fn api_version(&self) -> &'static str {
        match self {
            SourceKind::GitRepository => "v1",
            SourceKind::Bucket | SourceKind::OciRepository => "v1beta2",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            SourceKind::GitRepository => "gitrepositories",
            SourceKind::Bucket => "buckets",
            SourceKind::OciRepository => "ocirepositories",
        }
    }

    pub fn all() -> [SourceKind; 3] {
        [
            SourceKind::GitRepository,
            SourceKind::Bucket,
            SourceKind::OciRepository,
        ]
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to another Terraform object
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedObjectReference {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum RetryStrategy {
    #[default]
    StaticInterval,
    ExponentialBackoff,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Remediation {
    /// Number of failed passes tolerated before the object stalls. Negative means unlimited.
    #[serde(default)]
    pub retries: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutputsToSecretSpec {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Outputs to write, optionally renamed with `output:key`. Empty writes all outputs.
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// Post-planning webhook
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub stage: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub url: String,
    #[serde(default)]
    pub payload_type: WebhookPayloadType,
    /// Template evaluated against the JSON reply, for example `${{ .passed }}`
    #[serde(default)]
    pub test_expression: String,
    #[serde(default)]
    pub error_message_template: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum WebhookPayloadType {
    #[default]
    SpecAndPlan,
    SpecOnly,
    PlanOnly,
}

pub const WEBHOOK_STAGE_POST_PLANNING: &str = "post-planning";

/// A single Terraform input variable
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum VarsSourceKind {
    #[default]
    Secret,
    ConfigMap,
}

/// Secret or ConfigMap in the object's namespace to read variables from
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VarsReference {
    #[serde(default)]
    pub kind: VarsSourceKind,
    pub name: String,
    /// Keys to read, optionally renamed with `key:variable`. `None` reads every key.
    #[serde(default)]
    pub vars_keys: Option<Vec<String>>,
    /// A missing source is skipped instead of failing the pass
    #[serde(default)]
    pub optional: bool,
}

/// Terraform state backend settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfigSpec {
    /// Write no backend block at all
    #[serde(default)]
    pub disable: bool,
    #[serde(default)]
    pub secret_suffix: String,
    #[serde(default)]
    pub in_cluster_config: bool,
    /// Raw HCL placed inside the `terraform` block, replacing the kubernetes backend
    #[serde(default)]
    pub custom_configuration: String,
    #[serde(default)]
    pub config_path: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum HealthCheckType {
    #[default]
    Tcp,
    HttpGet,
}

/// Check run against provisioned infrastructure after an apply.
///
/// `address` (tcp) and `url` (httpGet) may reference outputs written to the
/// outputs secret with `${{ .key }}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub name: String,
    #[serde(default, rename = "type")]
    pub check_type: HealthCheckType,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub address: String,
    /// Defaults to 20s
    #[serde(default)]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ForceUnlock {
    Yes,
    #[default]
    No,
    Auto,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TfStateSpec {
    /// `yes` unlocks `lockIdentifier` when it matches the pending lock, `auto`
    /// unlocks whatever lock is pending. Only use `auto` when nothing else
    /// writes this state.
    #[serde(default)]
    pub force_unlock: ForceUnlock,
    #[serde(default)]
    pub lock_identifier: String,
}

/// Human readable copy of each saved plan kept next to the plan secret
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReadablePlan {
    #[default]
    None,
    Json,
    Human,
}

impl ReadablePlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadablePlan::None => "none",
            ReadablePlan::Json => "json",
            ReadablePlan::Human => "human",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunnerPodTemplate {
    #[serde(default)]
    pub metadata: RunnerPodMetadata,
    #[serde(default)]
    pub spec: RunnerPodSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunnerPodMetadata {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Subset of the pod spec users may customise on runner pods
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerPodSpec {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub image_pull_policy: Option<String>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub env_from: Vec<EnvFromSource>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub affinity: Option<Affinity>,
    #[serde(default)]
    pub host_aliases: Vec<HostAlias>,
    #[serde(default)]
    pub priority_class_name: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub security_context: Option<SecurityContext>,
    #[serde(default)]
    pub init_containers: Vec<Container>,
}

impl JsonSchema for RunnerPodSpec {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("RunnerPodSpec")
    }

    fn json_schema(_gen: &mut SchemaGenerator) -> Schema {
        // Core types are validated by the API server when the pod is created
        schemars::json_schema!({
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true,
            "description": "Runner pod overrides: image, env, volumes, scheduling and security settings."
        })
    }
}

impl Terraform {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace_or_default(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or_default()
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn finalizers(&self) -> &[String] {
        self.metadata.finalizers.as_deref().unwrap_or_default()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }

    pub fn status_or_default(&self) -> TerraformStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Namespace of the runner pod and the plan secrets
    pub fn runner_namespace(&self) -> &str {
        self.namespace_or_default()
    }
}
