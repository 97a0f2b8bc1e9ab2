//! # Shared Test Fixtures
//!
//! In-memory stand-ins for the cluster, the source controller, the artifact
//! server and the runner, plus helpers to wire them into a [`Reconciler`].

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use controller::certs::{CertRotator, CertRotatorHandle, NamespaceTls};
use controller::cluster::{ClusterClient, ClusterError};
use controller::config::{CertRotationConfig, ControllerConfig, RunnerConfig};
use controller::controller::reconciler::Reconciler;
use controller::controller::webhooks::WebhookInvoker;
use controller::runner::{RunnerApi, RunnerDialer, RunnerError, RunnerOrchestrator, RunnerTarget};
use controller::shutdown::ShutdownCoordinator;
use controller::source::{
    ArtifactDescriptor, ArtifactError, ArtifactFetcher, FetchedArtifact, SourceError,
    SourceProvider,
};
use controller::{SourceKind, SourceRef, Terraform, TerraformSpec, TerraformStatus};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, PodStatus, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use runner_proto::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tonic::Status;

pub const NAMESPACE: &str = "flux-system";
pub const REVISION: &str = "main@sha1:b8e362c206e3d0cbb7ed22ced771a0056455a2fb";
pub const NEXT_REVISION: &str = "main@sha1:f2ab685bf84dac0ba125378a22877e8d1e7a4c11";

/// Builds a gzipped tarball holding a single `main.tf`
pub fn module_tarball() -> Vec<u8> {
    let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
        Vec::new(),
        flate2::Compression::default(),
    ));
    let body = b"resource \"null_resource\" \"hello\" {}\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(body.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "main.tf", &body[..])
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn sha256_digest(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    format!("sha256:{:x}", Sha256::digest(bytes))
}

/// A Terraform object that already carries the controller finalizer
pub fn terraform(name: &str, approve_plan: &str) -> Terraform {
    let mut tf = Terraform::new(
        name,
        TerraformSpec {
            approve_plan: approve_plan.to_string(),
            source_ref: SourceRef {
                kind: SourceKind::GitRepository,
                name: "infra".to_string(),
                namespace: None,
            },
            ..TerraformSpec::default()
        },
    );
    tf.metadata.namespace = Some(NAMESPACE.to_string());
    tf.metadata.generation = Some(1);
    tf.metadata.uid = Some(format!("uid-{name}"));
    tf.metadata.finalizers = Some(vec![controller::constants::TERRAFORM_FINALIZER.to_string()]);
    tf
}

/// Serialized form keeps this independent of the time crate behind `Time`
pub fn deletion_time() -> Time {
    serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).unwrap()
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

/// Cluster writes observed by tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterWrite {
    Status(String),
    Finalizers(String, Vec<String>),
    PodCreated(String),
    PodDeleted(String, i64),
    SecretCreated(String),
    SecretDeleted(String),
}

#[derive(Debug, Default)]
struct ClusterState {
    terraforms: BTreeMap<(String, String), Terraform>,
    pods: BTreeMap<(String, String), Pod>,
    secrets: BTreeMap<(String, String), Secret>,
    config_maps: BTreeMap<(String, String), ConfigMap>,
    writes: Vec<ClusterWrite>,
    /// Every status written, in order
    statuses: Vec<TerraformStatus>,
    /// Deleted pods linger as terminating for this many `get_pod` calls
    terminating_reads: usize,
    /// Source of Terraform resourceVersions, bumped on every object write
    resource_version: u64,
    /// Created pods never get an IP assigned
    withhold_pod_ip: bool,
    /// Reads of these secrets fail with an API error
    unreadable_secrets: Vec<String>,
}

impl ClusterState {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

/// In-memory cluster. Created pods come up running with an IP.
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stores an object as a client write would, assigning a fresh resourceVersion
    pub fn insert_terraform(&self, mut terraform: Terraform) {
        let k = key(terraform.namespace_or_default(), terraform.name());
        let mut state = self.state.lock().unwrap();
        terraform.metadata.resource_version = Some(state.next_resource_version());
        state.terraforms.insert(k, terraform);
    }

    pub fn terraform(&self, name: &str) -> Option<Terraform> {
        self.state
            .lock()
            .unwrap()
            .terraforms
            .get(&key(NAMESPACE, name))
            .cloned()
    }

    pub fn status(&self, name: &str) -> TerraformStatus {
        self.terraform(name)
            .and_then(|tf| tf.status)
            .unwrap_or_default()
    }

    pub fn insert_pod(&self, pod: Pod) {
        let k = key(
            pod.metadata.namespace.as_deref().unwrap_or_default(),
            pod.metadata.name.as_deref().unwrap_or_default(),
        );
        self.state.lock().unwrap().pods.insert(k, pod);
    }

    pub fn pod(&self, name: &str) -> Option<Pod> {
        self.state
            .lock()
            .unwrap()
            .pods
            .get(&key(NAMESPACE, name))
            .cloned()
    }

    pub fn insert_secret(&self, secret: Secret) {
        let k = key(
            secret.metadata.namespace.as_deref().unwrap_or_default(),
            secret.metadata.name.as_deref().unwrap_or_default(),
        );
        self.state.lock().unwrap().secrets.insert(k, secret);
    }

    pub fn insert_config_map(&self, config_map: ConfigMap) {
        let k = key(
            config_map.metadata.namespace.as_deref().unwrap_or_default(),
            config_map.metadata.name.as_deref().unwrap_or_default(),
        );
        self.state.lock().unwrap().config_maps.insert(k, config_map);
    }

    pub fn secret_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .keys()
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn writes(&self) -> Vec<ClusterWrite> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn statuses(&self) -> Vec<TerraformStatus> {
        self.state.lock().unwrap().statuses.clone()
    }

    /// Deleted pods stay visible as terminating for `reads` lookups
    pub fn set_terminating_reads(&self, reads: usize) {
        self.state.lock().unwrap().terminating_reads = reads;
    }

    /// Pods created from now on stay pending without an IP
    pub fn withhold_pod_ip(&self) {
        self.state.lock().unwrap().withhold_pod_ip = true;
    }

    /// Reading the named secret fails from now on
    pub fn fail_secret_reads(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .unreadable_secrets
            .push(name.to_string());
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_terraform(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Terraform>, ClusterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .terraforms
            .get(&key(namespace, name))
            .cloned())
    }

    async fn list_terraforms(&self) -> Result<Vec<Terraform>, ClusterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .terraforms
            .values()
            .cloned()
            .collect())
    }

    async fn patch_terraform_status(
        &self,
        namespace: &str,
        name: &str,
        status: &TerraformStatus,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.writes.push(ClusterWrite::Status(name.to_string()));
        state.statuses.push(status.clone());
        let version = state.next_resource_version();
        if let Some(tf) = state.terraforms.get_mut(&key(namespace, name)) {
            tf.status = Some(status.clone());
            tf.metadata.resource_version = Some(version);
        }
        Ok(())
    }

    async fn patch_terraform_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        let k = key(namespace, name);
        let version = state.next_resource_version();
        let Some(tf) = state.terraforms.get_mut(&k) else {
            return Err(ClusterError::not_found("Terraform", namespace, name));
        };
        if resource_version.is_some_and(|v| tf.metadata.resource_version.as_deref() != Some(v)) {
            return Err(ClusterError::Conflict {
                kind: "Terraform",
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        tf.metadata.finalizers = Some(finalizers.to_vec());
        tf.metadata.resource_version = Some(version);
        // The API server removes a deleting object once its last finalizer is gone
        let released = finalizers.is_empty() && tf.is_deleting();
        if released {
            state.terraforms.remove(&k);
        }
        state
            .writes
            .push(ClusterWrite::Finalizers(name.to_string(), finalizers.to_vec()));
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ClusterError> {
        let mut state = self.state.lock().unwrap();
        let k = key(namespace, name);
        let terminating = state
            .pods
            .get(&k)
            .is_some_and(|pod| pod.metadata.deletion_timestamp.is_some());
        if terminating {
            if state.terminating_reads == 0 {
                state.pods.remove(&k);
                return Ok(None);
            }
            state.terminating_reads -= 1;
        }
        Ok(state.pods.get(&k).cloned())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let name = pod.metadata.name.clone().unwrap_or_default();
        let k = key(&namespace, &name);
        if state.pods.contains_key(&k) {
            return Err(ClusterError::AlreadyExists {
                kind: "Pod",
                namespace,
                name,
            });
        }
        let mut pod = pod.clone();
        pod.status = Some(if state.withhold_pod_ip {
            PodStatus {
                phase: Some("Pending".to_string()),
                ..PodStatus::default()
            }
        } else {
            PodStatus {
                phase: Some("Running".to_string()),
                pod_ip: Some("10.0.0.12".to_string()),
                ..PodStatus::default()
            }
        });
        state.writes.push(ClusterWrite::PodCreated(name));
        state.pods.insert(k, pod);
        Ok(())
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: i64,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        let k = key(namespace, name);
        let Some(pod) = state.pods.get_mut(&k) else {
            return Err(ClusterError::not_found("Pod", namespace, name));
        };
        pod.metadata.deletion_timestamp = Some(deletion_time());
        state
            .writes
            .push(ClusterWrite::PodDeleted(name.to_string(), grace_period_seconds));
        Ok(())
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, ClusterError> {
        let state = self.state.lock().unwrap();
        if state.unreadable_secrets.iter().any(|s| s == name) {
            return Err(ClusterError::Invalid(format!("secret {namespace}/{name} is unavailable")));
        }
        Ok(state.secrets.get(&key(namespace, name)).cloned())
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        let namespace = secret.metadata.namespace.clone().unwrap_or_default();
        let name = secret.metadata.name.clone().unwrap_or_default();
        let k = key(&namespace, &name);
        if state.secrets.contains_key(&k) {
            return Err(ClusterError::AlreadyExists {
                kind: "Secret",
                namespace,
                name,
            });
        }
        state.writes.push(ClusterWrite::SecretCreated(name));
        state.secrets.insert(k, secret.clone());
        Ok(())
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, ClusterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .config_maps
            .get(&key(namespace, name))
            .cloned())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.secrets.remove(&key(namespace, name)).is_none() {
            return Err(ClusterError::not_found("Secret", namespace, name));
        }
        state.writes.push(ClusterWrite::SecretDeleted(name.to_string()));
        Ok(())
    }

    async fn list_secrets(&self, label_selector: &str) -> Result<Vec<Secret>, ClusterError> {
        let (label, value) = label_selector
            .split_once('=')
            .unwrap_or((label_selector, ""));
        Ok(self
            .state
            .lock()
            .unwrap()
            .secrets
            .values()
            .filter(|s| {
                s.metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(label))
                    .is_some_and(|v| v == value)
            })
            .cloned()
            .collect())
    }
}

/// Source controller serving a single artifact per name
#[derive(Debug, Default)]
pub struct FakeSource {
    artifacts: Mutex<HashMap<String, Option<ArtifactDescriptor>>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `None` models a source that exists but has no artifact yet
    pub fn serve(&self, name: &str, artifact: Option<ArtifactDescriptor>) {
        self.artifacts
            .lock()
            .unwrap()
            .insert(name.to_string(), artifact);
    }
}

#[async_trait]
impl SourceProvider for FakeSource {
    async fn artifact(
        &self,
        kind: SourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ArtifactDescriptor>, SourceError> {
        match self.artifacts.lock().unwrap().get(name) {
            Some(artifact) => Ok(artifact.clone()),
            None => Err(SourceError::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
        }
    }
}

pub fn artifact(revision: &str) -> ArtifactDescriptor {
    let tarball = module_tarball();
    ArtifactDescriptor {
        url: "http://source-controller.flux-system.svc/gitrepository/infra.tar.gz".to_string(),
        revision: revision.to_string(),
        digest: Some(sha256_digest(&tarball)),
        size: Some(tarball.len() as u64),
    }
}

/// Serves [`module_tarball`] after verifying it against the descriptor
#[derive(Debug, Default)]
pub struct FakeFetcher;

#[async_trait]
impl ArtifactFetcher for FakeFetcher {
    async fn fetch(&self, artifact: &ArtifactDescriptor) -> Result<FetchedArtifact, ArtifactError> {
        controller::source::verify_and_extract(module_tarball(), artifact)
    }
}

/// How the fake runner answers a plan
#[derive(Debug, Clone)]
pub struct RunnerScript {
    pub plan_drifted: bool,
    pub plan_created: bool,
    pub plan_error: Option<Status>,
    pub apply_error: Option<Status>,
    pub outputs: HashMap<String, OutputMeta>,
}

impl Default for RunnerScript {
    fn default() -> Self {
        Self {
            plan_drifted: true,
            plan_created: true,
            plan_error: None,
            apply_error: None,
            outputs: HashMap::new(),
        }
    }
}

/// Runner recording every RPC by name
#[derive(Debug, Default)]
pub struct FakeRunner {
    pub script: Mutex<RunnerScript>,
    calls: Mutex<Vec<String>>,
    plans: Mutex<Vec<PlanRequest>>,
    written_outputs: Mutex<Vec<WriteOutputsRequest>>,
    backend_configs: Mutex<Vec<WriteBackendConfigRequest>>,
    cli_configs: Mutex<Vec<ProcessCliConfigRequest>>,
    envs: Mutex<Vec<SetEnvRequest>>,
    vars: Mutex<Vec<GenerateVarsForTfRequest>>,
    inits: Mutex<Vec<InitRequest>>,
    unlocks: Mutex<Vec<ForceUnlockRequest>>,
    saved_plans: Mutex<Vec<SaveTfPlanRequest>>,
}

impl FakeRunner {
    pub fn new(script: RunnerScript) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, rpc: &str) -> bool {
        self.calls().iter().any(|c| c == rpc)
    }

    pub fn plans(&self) -> Vec<PlanRequest> {
        self.plans.lock().unwrap().clone()
    }

    pub fn written_outputs(&self) -> Vec<WriteOutputsRequest> {
        self.written_outputs.lock().unwrap().clone()
    }

    /// Backend HCL written on each pass
    pub fn backend_configs(&self) -> Vec<String> {
        self.backend_configs
            .lock()
            .unwrap()
            .iter()
            .map(|r| String::from_utf8_lossy(&r.backend_config).into_owned())
            .collect()
    }

    pub fn cli_configs(&self) -> Vec<ProcessCliConfigRequest> {
        self.cli_configs.lock().unwrap().clone()
    }

    pub fn envs(&self) -> Vec<SetEnvRequest> {
        self.envs.lock().unwrap().clone()
    }

    /// Variables file contents generated on each pass
    pub fn generated_vars(&self) -> Vec<serde_json::Value> {
        self.vars
            .lock()
            .unwrap()
            .iter()
            .map(|r| serde_json::from_slice(&r.vars).unwrap())
            .collect()
    }

    pub fn inits(&self) -> Vec<InitRequest> {
        self.inits.lock().unwrap().clone()
    }

    pub fn unlocks(&self) -> Vec<ForceUnlockRequest> {
        self.unlocks.lock().unwrap().clone()
    }

    pub fn saved_plans(&self) -> Vec<SaveTfPlanRequest> {
        self.saved_plans.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, rpc: &str) {
        self.calls.lock().unwrap().push(rpc.to_string());
    }
}

#[async_trait]
impl RunnerApi for FakeRunner {
    async fn upload_and_extract(
        &self,
        _request: UploadAndExtractRequest,
    ) -> Result<UploadAndExtractReply, Status> {
        self.record("UploadAndExtract");
        Ok(UploadAndExtractReply {
            message: "ok".to_string(),
            working_dir: "/tmp/tf-1234/infra".to_string(),
            tmp_dir: "/tmp/tf-1234".to_string(),
        })
    }

    async fn new_terraform(
        &self,
        request: NewTerraformRequest,
    ) -> Result<NewTerraformReply, Status> {
        self.record("NewTerraform");
        Ok(NewTerraformReply {
            id: request.instance_id,
        })
    }

    async fn write_backend_config(
        &self,
        request: WriteBackendConfigRequest,
    ) -> Result<WriteBackendConfigReply, Status> {
        self.record("WriteBackendConfig");
        self.backend_configs.lock().unwrap().push(request);
        Ok(WriteBackendConfigReply {
            message: "ok".to_string(),
        })
    }

    async fn process_cli_config(
        &self,
        request: ProcessCliConfigRequest,
    ) -> Result<ProcessCliConfigReply, Status> {
        self.record("ProcessCliConfig");
        let file_path = format!("{}/generated.tfrc", request.dir_path);
        self.cli_configs.lock().unwrap().push(request);
        Ok(ProcessCliConfigReply { file_path })
    }

    async fn set_env(&self, request: SetEnvRequest) -> Result<SetEnvReply, Status> {
        self.record("SetEnv");
        self.envs.lock().unwrap().push(request);
        Ok(SetEnvReply::default())
    }

    async fn generate_vars_for_tf(
        &self,
        request: GenerateVarsForTfRequest,
    ) -> Result<GenerateVarsForTfReply, Status> {
        self.record("GenerateVarsForTF");
        self.vars.lock().unwrap().push(request);
        Ok(GenerateVarsForTfReply {
            message: "ok".to_string(),
        })
    }

    async fn init(&self, request: InitRequest) -> Result<InitReply, Status> {
        self.record("Init");
        self.inits.lock().unwrap().push(request);
        Ok(InitReply {
            message: "ok".to_string(),
        })
    }

    async fn force_unlock(&self, request: ForceUnlockRequest) -> Result<ForceUnlockReply, Status> {
        self.record("ForceUnlock");
        self.unlocks.lock().unwrap().push(request);
        Ok(ForceUnlockReply::default())
    }

    async fn plan(&self, request: PlanRequest) -> Result<PlanReply, Status> {
        self.record("Plan");
        self.plans.lock().unwrap().push(request);
        let script = self.script.lock().unwrap().clone();
        if let Some(status) = script.plan_error {
            return Err(status);
        }
        Ok(PlanReply {
            drifted: script.plan_drifted,
            message: "ok".to_string(),
            state_lock_identifier: String::new(),
            plan_created: script.plan_created,
        })
    }

    async fn save_tf_plan(&self, request: SaveTfPlanRequest) -> Result<SaveTfPlanReply, Status> {
        self.record("SaveTFPlan");
        self.saved_plans.lock().unwrap().push(request);
        Ok(SaveTfPlanReply::default())
    }

    async fn load_tf_plan(&self, _request: LoadTfPlanRequest) -> Result<LoadTfPlanReply, Status> {
        self.record("LoadTFPlan");
        Ok(LoadTfPlanReply::default())
    }

    async fn apply(&self, _request: ApplyRequest) -> Result<ApplyReply, Status> {
        self.record("Apply");
        match self.script.lock().unwrap().apply_error.clone() {
            Some(status) => Err(status),
            None => Ok(ApplyReply::default()),
        }
    }

    async fn destroy(&self, _request: DestroyRequest) -> Result<DestroyReply, Status> {
        self.record("Destroy");
        Ok(DestroyReply::default())
    }

    async fn output(&self, _request: OutputRequest) -> Result<OutputReply, Status> {
        self.record("Output");
        Ok(OutputReply {
            outputs: self.script.lock().unwrap().outputs.clone(),
        })
    }

    async fn write_outputs(
        &self,
        request: WriteOutputsRequest,
    ) -> Result<WriteOutputsReply, Status> {
        self.record("WriteOutputs");
        self.written_outputs.lock().unwrap().push(request);
        Ok(WriteOutputsReply {
            message: "ok".to_string(),
            changed: true,
        })
    }

    async fn show_plan_file(
        &self,
        _request: ShowPlanFileRequest,
    ) -> Result<ShowPlanFileReply, Status> {
        self.record("ShowPlanFile");
        Ok(ShowPlanFileReply {
            json_output: br#"{"resource_changes":[{"address":"null_resource.hello"}]}"#.to_vec(),
        })
    }

    async fn show_plan_file_raw(
        &self,
        _request: ShowPlanFileRawRequest,
    ) -> Result<ShowPlanFileRawReply, Status> {
        self.record("ShowPlanFileRaw");
        Ok(ShowPlanFileRawReply {
            raw_output: "null_resource.hello has changed".to_string(),
        })
    }

    async fn finalize_secrets(
        &self,
        _request: FinalizeSecretsRequest,
    ) -> Result<FinalizeSecretsReply, Status> {
        self.record("FinalizeSecrets");
        Ok(FinalizeSecretsReply::default())
    }

    async fn cleanup_dir(&self, _request: CleanupDirRequest) -> Result<CleanupDirReply, Status> {
        self.record("CleanupDir");
        Ok(CleanupDirReply::default())
    }
}

/// Hands out the same [`FakeRunner`] for every target and remembers where it dialed
#[derive(Debug)]
pub struct FakeDialer {
    runner: Arc<FakeRunner>,
    targets: Mutex<Vec<RunnerTarget>>,
}

impl FakeDialer {
    pub fn new(runner: Arc<FakeRunner>) -> Arc<Self> {
        Arc::new(Self {
            runner,
            targets: Mutex::new(Vec::new()),
        })
    }

    pub fn targets(&self) -> Vec<RunnerTarget> {
        self.targets.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunnerDialer for FakeDialer {
    async fn dial(
        &self,
        target: &RunnerTarget,
        _tls: &NamespaceTls,
    ) -> Result<Arc<dyn RunnerApi>, RunnerError> {
        self.targets.lock().unwrap().push(target.clone());
        let runner: Arc<dyn RunnerApi> = Arc::clone(&self.runner) as Arc<dyn RunnerApi>;
        Ok(runner)
    }
}

/// Runner settings with millisecond polling so tests stay fast
pub fn fast_runner_config() -> RunnerConfig {
    RunnerConfig {
        creation_timeout: Duration::from_secs(2),
        termination_poll_interval: Duration::from_millis(10),
        ip_poll_interval: Duration::from_millis(10),
        cleanup_poll_interval: Duration::from_millis(10),
        cleanup_timeout: Duration::from_secs(1),
        ..RunnerConfig::default()
    }
}

pub fn spawn_rotator(cluster: Arc<FakeCluster>) -> CertRotatorHandle {
    let cluster: Arc<dyn ClusterClient> = cluster;
    let (handle, _task) = CertRotator::spawn(
        cluster,
        CertRotationConfig::default(),
        "cluster.local".to_string(),
        false,
    );
    handle
}

/// Everything an end-to-end reconcile test inspects
#[derive(Debug)]
pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub source: Arc<FakeSource>,
    pub runner: Arc<FakeRunner>,
    pub dialer: Arc<FakeDialer>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    pub fn new(script: RunnerScript) -> Self {
        Self::with_config(script, ControllerConfig::default())
    }

    pub fn with_config(script: RunnerScript, config: ControllerConfig) -> Self {
        let config = ControllerConfig {
            runner: fast_runner_config(),
            ..config
        };
        let cluster = FakeCluster::new();
        let source = FakeSource::new();
        source.serve("infra", Some(artifact(REVISION)));
        let runner = FakeRunner::new(script);
        let dialer = FakeDialer::new(Arc::clone(&runner));

        let certs = spawn_rotator(Arc::clone(&cluster));
        let cluster_client: Arc<dyn ClusterClient> = Arc::clone(&cluster) as Arc<dyn ClusterClient>;
        let runners = RunnerOrchestrator::new(
            Arc::clone(&cluster_client),
            certs,
            Arc::clone(&dialer) as Arc<dyn RunnerDialer>,
            config.runner.clone(),
        );
        let reconciler = Arc::new(Reconciler {
            cluster: cluster_client,
            sources: Arc::clone(&source) as Arc<dyn SourceProvider>,
            fetcher: Arc::new(FakeFetcher),
            runners,
            webhooks: WebhookInvoker::new(true),
            shutdown: ShutdownCoordinator::new(config.shutdown_timeout),
            config: Arc::new(config),
        });

        Self {
            cluster,
            source,
            runner,
            dialer,
            reconciler,
        }
    }

    /// Stores `terraform` and runs one reconcile pass over it
    pub async fn reconcile(
        &self,
        name: &str,
    ) -> Result<kube::runtime::controller::Action, controller::controller::reconciler::ReconcilerError>
    {
        let terraform = self
            .cluster
            .terraform(name)
            .expect("terraform object should exist");
        controller::controller::reconciler::reconcile(
            Arc::new(terraform),
            Arc::clone(&self.reconciler),
        )
        .await
    }

    pub fn update_spec(&self, name: &str, update: impl FnOnce(&mut TerraformSpec)) {
        let mut tf = self.cluster.terraform(name).expect("terraform object should exist");
        update(&mut tf.spec);
        tf.metadata.generation = Some(tf.generation() + 1);
        self.cluster.insert_terraform(tf);
    }
}
