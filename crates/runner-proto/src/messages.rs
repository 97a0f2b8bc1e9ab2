//! Request and reply messages for every runner RPC.

use std::collections::HashMap;

#[derive(Clone, PartialEq, prost::Message)]
pub struct UploadAndExtractRequest {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(bytes = "vec", tag = "3")]
    pub tar_gz: Vec<u8>,
    #[prost(string, tag = "4")]
    pub path: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UploadAndExtractReply {
    #[prost(string, tag = "1")]
    pub message: String,
    #[prost(string, tag = "2")]
    pub working_dir: String,
    #[prost(string, tag = "3")]
    pub tmp_dir: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct NewTerraformRequest {
    #[prost(string, tag = "1")]
    pub working_dir: String,
    /// Empty lets the runner resolve the terraform binary on its own PATH
    #[prost(string, tag = "2")]
    pub exec_path: String,
    #[prost(string, tag = "3")]
    pub instance_id: String,
    /// JSON encoded Terraform resource
    #[prost(bytes = "vec", tag = "4")]
    pub terraform: Vec<u8>,
    #[prost(string, tag = "5")]
    pub workspace: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct NewTerraformReply {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InitRequest {
    #[prost(string, tag = "1")]
    pub tf_instance: String,
    #[prost(bool, tag = "2")]
    pub upgrade: bool,
    #[prost(bool, tag = "3")]
    pub force_copy: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InitReply {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PlanRequest {
    #[prost(string, tag = "1")]
    pub tf_instance: String,
    #[prost(string, tag = "2")]
    pub out: String,
    #[prost(bool, tag = "3")]
    pub refresh: bool,
    #[prost(bool, tag = "4")]
    pub destroy: bool,
    #[prost(string, repeated, tag = "5")]
    pub targets: Vec<String>,
    #[prost(string, tag = "6")]
    pub source_ref_root_dir: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PlanReply {
    #[prost(bool, tag = "1")]
    pub drifted: bool,
    #[prost(string, tag = "2")]
    pub message: String,
    /// Set when the plan failed because the state is locked
    #[prost(string, tag = "3")]
    pub state_lock_identifier: String,
    #[prost(bool, tag = "4")]
    pub plan_created: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SaveTfPlanRequest {
    #[prost(string, tag = "1")]
    pub tf_instance: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub namespace: String,
    #[prost(string, tag = "4")]
    pub uuid: String,
    #[prost(string, tag = "5")]
    pub revision: String,
    /// `none`, `json` or `human`
    #[prost(string, tag = "6")]
    pub store_readable_plan: String,
    #[prost(string, tag = "7")]
    pub workspace: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SaveTfPlanReply {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadTfPlanRequest {
    #[prost(string, tag = "1")]
    pub tf_instance: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub namespace: String,
    /// The runner refuses to load a stored plan whose label differs from this id
    #[prost(string, tag = "4")]
    pub pending_plan: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoadTfPlanReply {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ApplyRequest {
    #[prost(string, tag = "1")]
    pub tf_instance: String,
    #[prost(string, tag = "2")]
    pub dir_or_plan: String,
    #[prost(bool, tag = "3")]
    pub refresh_before_apply: bool,
    #[prost(string, repeated, tag = "4")]
    pub targets: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ApplyReply {
    #[prost(string, tag = "1")]
    pub message: String,
    #[prost(string, tag = "2")]
    pub state_lock_identifier: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DestroyRequest {
    #[prost(string, tag = "1")]
    pub tf_instance: String,
    #[prost(string, repeated, tag = "2")]
    pub targets: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DestroyReply {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct OutputRequest {
    #[prost(string, tag = "1")]
    pub tf_instance: String,
}

/// One terraform output. `r#type` and `value` hold raw JSON.
#[derive(Clone, PartialEq, prost::Message)]
pub struct OutputMeta {
    #[prost(bool, tag = "1")]
    pub sensitive: bool,
    #[prost(bytes = "vec", tag = "2")]
    pub r#type: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct OutputReply {
    #[prost(map = "string, message", tag = "1")]
    pub outputs: HashMap<String, OutputMeta>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WriteOutputsRequest {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub secret_name: String,
    #[prost(string, tag = "4")]
    pub uuid: String,
    #[prost(map = "string, bytes", tag = "5")]
    pub data: HashMap<String, Vec<u8>>,
    #[prost(map = "string, string", tag = "6")]
    pub labels: HashMap<String, String>,
    #[prost(map = "string, string", tag = "7")]
    pub annotations: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WriteOutputsReply {
    #[prost(string, tag = "1")]
    pub message: String,
    #[prost(bool, tag = "2")]
    pub changed: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ShowPlanFileRequest {
    #[prost(string, tag = "1")]
    pub tf_instance: String,
    #[prost(string, tag = "2")]
    pub filename: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ShowPlanFileReply {
    /// Plan rendered as JSON
    #[prost(bytes = "vec", tag = "1")]
    pub json_output: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ShowPlanFileRawRequest {
    #[prost(string, tag = "1")]
    pub tf_instance: String,
    #[prost(string, tag = "2")]
    pub filename: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ShowPlanFileRawReply {
    #[prost(string, tag = "1")]
    pub raw_output: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FinalizeSecretsRequest {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub workspace: String,
    #[prost(bool, tag = "4")]
    pub has_specified_outputs_secret: bool,
    #[prost(string, tag = "5")]
    pub outputs_secret_name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FinalizeSecretsReply {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CleanupDirRequest {
    #[prost(string, tag = "1")]
    pub tmp_dir: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CleanupDirReply {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WriteBackendConfigRequest {
    #[prost(string, tag = "1")]
    pub dir_path: String,
    /// HCL written to `backend_override.tf`
    #[prost(bytes = "vec", tag = "2")]
    pub backend_config: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WriteBackendConfigReply {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProcessCliConfigRequest {
    #[prost(string, tag = "1")]
    pub dir_path: String,
    #[prost(string, tag = "2")]
    pub namespace: String,
    #[prost(string, tag = "3")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProcessCliConfigReply {
    #[prost(string, tag = "1")]
    pub file_path: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SetEnvRequest {
    #[prost(string, tag = "1")]
    pub tf_instance: String,
    #[prost(map = "string, string", tag = "2")]
    pub envs: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SetEnvReply {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GenerateVarsForTfRequest {
    #[prost(string, tag = "1")]
    pub working_dir: String,
    /// JSON object written to `generated.auto.tfvars.json`
    #[prost(bytes = "vec", tag = "2")]
    pub vars: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GenerateVarsForTfReply {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ForceUnlockRequest {
    #[prost(string, tag = "1")]
    pub tf_instance: String,
    #[prost(string, tag = "2")]
    pub lock_identifier: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ForceUnlockReply {
    #[prost(string, tag = "1")]
    pub message: String,
}
