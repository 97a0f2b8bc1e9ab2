//! Unary gRPC client for the runner service.

use crate::messages::*;
use tonic::codegen::http;
use tonic::transport::Channel;
use tonic::GrpcMethod;

/// Client for the `runner.Runner` service
#[derive(Debug, Clone)]
pub struct RunnerClient {
    inner: tonic::client::Grpc<Channel>,
}

macro_rules! unary {
    ($(#[$doc:meta])* $fn_name:ident, $method:literal, $req:ty, $reply:ty) => {
        $(#[$doc])*
        pub async fn $fn_name(
            &mut self,
            request: impl tonic::IntoRequest<$req>,
        ) -> Result<tonic::Response<$reply>, tonic::Status> {
            self.inner
                .ready()
                .await
                .map_err(|e| tonic::Status::unknown(format!("Service was not ready: {e}")))?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(concat!("/runner.Runner/", $method));
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new(crate::SERVICE_NAME, $method));
            self.inner.unary(req, path, codec).await
        }
    };
}

impl RunnerClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    /// Limits the maximum size of a decoded message
    #[must_use]
    pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
        self.inner = self.inner.max_decoding_message_size(limit);
        self
    }

    /// Limits the maximum size of an encoded message
    #[must_use]
    pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
        self.inner = self.inner.max_encoding_message_size(limit);
        self
    }

    unary!(
        /// Ships the source tarball and extracts it inside the runner
        upload_and_extract,
        "UploadAndExtract",
        UploadAndExtractRequest,
        UploadAndExtractReply
    );
    unary!(new_terraform, "NewTerraform", NewTerraformRequest, NewTerraformReply);
    unary!(
        write_backend_config,
        "WriteBackendConfig",
        WriteBackendConfigRequest,
        WriteBackendConfigReply
    );
    unary!(
        /// Copies the CLI configuration secret into the working directory
        process_cli_config,
        "ProcessCliConfig",
        ProcessCliConfigRequest,
        ProcessCliConfigReply
    );
    unary!(set_env, "SetEnv", SetEnvRequest, SetEnvReply);
    unary!(
        generate_vars_for_tf,
        "GenerateVarsForTF",
        GenerateVarsForTfRequest,
        GenerateVarsForTfReply
    );
    unary!(init, "Init", InitRequest, InitReply);
    unary!(force_unlock, "ForceUnlock", ForceUnlockRequest, ForceUnlockReply);
    unary!(plan, "Plan", PlanRequest, PlanReply);
    unary!(save_tf_plan, "SaveTFPlan", SaveTfPlanRequest, SaveTfPlanReply);
    unary!(load_tf_plan, "LoadTFPlan", LoadTfPlanRequest, LoadTfPlanReply);
    unary!(apply, "Apply", ApplyRequest, ApplyReply);
    unary!(destroy, "Destroy", DestroyRequest, DestroyReply);
    unary!(output, "Output", OutputRequest, OutputReply);
    unary!(write_outputs, "WriteOutputs", WriteOutputsRequest, WriteOutputsReply);
    unary!(show_plan_file, "ShowPlanFile", ShowPlanFileRequest, ShowPlanFileReply);
    unary!(
        show_plan_file_raw,
        "ShowPlanFileRaw",
        ShowPlanFileRawRequest,
        ShowPlanFileRawReply
    );
    unary!(
        /// Removes plan and state secrets owned by a resource being deleted
        finalize_secrets,
        "FinalizeSecrets",
        FinalizeSecretsRequest,
        FinalizeSecretsReply
    );
    unary!(cleanup_dir, "CleanupDir", CleanupDirRequest, CleanupDirReply);
}
