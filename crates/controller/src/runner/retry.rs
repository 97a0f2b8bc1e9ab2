//! Retries runner calls while the runner is briefly unavailable.

use super::RunnerApi;
use crate::constants::{RUNNER_RPC_BACKOFF_MS, RUNNER_RPC_MAX_ATTEMPTS};
use async_trait::async_trait;
use runner_proto::*;
use std::future::Future;
use std::time::Duration;
use tonic::{Code, Status};
use tracing::warn;

/// Bounded attempts with a fixed backoff
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RUNNER_RPC_MAX_ATTEMPTS,
            backoff: Duration::from_millis(RUNNER_RPC_BACKOFF_MS),
        }
    }
}

/// Runs `operation` until it succeeds, fails with anything but `Unavailable`,
/// or the attempts are exhausted.
pub async fn retry_unavailable<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, Status>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Status>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(status) if status.code() == Code::Unavailable && attempt < policy.max_attempts => {
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %status.message(),
                    "Runner unavailable, retrying"
                );
                tokio::time::sleep(policy.backoff).await;
            }
            Err(status) => return Err(status),
        }
    }
}

/// [`RunnerApi`] over a gRPC client with transparent retries
#[derive(Debug, Clone)]
pub struct RetryingRunnerClient {
    client: RunnerClient,
    policy: RetryPolicy,
}

impl RetryingRunnerClient {
    pub fn new(client: RunnerClient, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }
}

macro_rules! retrying_runner_api {
    ($($fn_name:ident($req:ty) -> $reply:ty;)*) => {
        #[async_trait]
        impl RunnerApi for RetryingRunnerClient {
            $(
                async fn $fn_name(&self, request: $req) -> Result<$reply, Status> {
                    retry_unavailable(&self.policy, stringify!($fn_name), || {
                        let mut client = self.client.clone();
                        let request = request.clone();
                        async move {
                            client
                                .$fn_name(request)
                                .await
                                .map(tonic::Response::into_inner)
                        }
                    })
                    .await
                }
            )*
        }
    };
}

retrying_runner_api! {
    upload_and_extract(UploadAndExtractRequest) -> UploadAndExtractReply;
    new_terraform(NewTerraformRequest) -> NewTerraformReply;
    write_backend_config(WriteBackendConfigRequest) -> WriteBackendConfigReply;
    process_cli_config(ProcessCliConfigRequest) -> ProcessCliConfigReply;
    set_env(SetEnvRequest) -> SetEnvReply;
    generate_vars_for_tf(GenerateVarsForTfRequest) -> GenerateVarsForTfReply;
    init(InitRequest) -> InitReply;
    force_unlock(ForceUnlockRequest) -> ForceUnlockReply;
    plan(PlanRequest) -> PlanReply;
    save_tf_plan(SaveTfPlanRequest) -> SaveTfPlanReply;
    load_tf_plan(LoadTfPlanRequest) -> LoadTfPlanReply;
    apply(ApplyRequest) -> ApplyReply;
    destroy(DestroyRequest) -> DestroyReply;
    output(OutputRequest) -> OutputReply;
    write_outputs(WriteOutputsRequest) -> WriteOutputsReply;
    show_plan_file(ShowPlanFileRequest) -> ShowPlanFileReply;
    show_plan_file_raw(ShowPlanFileRawRequest) -> ShowPlanFileRawReply;
    finalize_secrets(FinalizeSecretsRequest) -> FinalizeSecretsReply;
    cleanup_dir(CleanupDirRequest) -> CleanupDirReply;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_unavailable_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_unavailable(&policy(), "plan", move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(Status::unavailable("starting"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), Status> = retry_unavailable(&policy(), "plan", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(Status::unavailable("down")) }
        })
        .await;
        assert_eq!(result.unwrap_err().code(), Code::Unavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_does_not_retry_other_codes() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), Status> = retry_unavailable(&policy(), "apply", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(Status::internal("apply failed")) }
        })
        .await;
        assert_eq!(result.unwrap_err().code(), Code::Internal);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
