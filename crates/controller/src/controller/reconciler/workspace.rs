//! Prepares a Terraform working directory on the runner: upload, backend
//! and CLI configuration, input variables, `init` and an optional force unlock.

use super::inputs::{self, InputError};
use super::types::{rpc_error, Pass, ReconcilerError};
use crate::constants::TF_CLI_CONFIG_FILE_ENV;
use crate::crd::{Outcome, Reason};
use crate::policy::LifecyclePolicy;
use crate::runner::RunnerApi;
use runner_proto::{
    CleanupDirRequest, ForceUnlockRequest, GenerateVarsForTfRequest, InitRequest,
    NewTerraformRequest, ProcessCliConfigRequest, SetEnvRequest, UploadAndExtractRequest,
    WriteBackendConfigRequest,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// A Terraform instance living in a temporary directory on the runner
#[derive(Debug, Clone)]
pub struct Workspace {
    pub instance: String,
    pub working_dir: String,
    pub tmp_dir: String,
}

/// Downloads the artifact, ships it to the runner and initialises Terraform.
///
/// On failure after the upload the temporary directory is removed before
/// returning.
pub async fn setup(pass: &mut Pass<'_>, runner: &dyn RunnerApi) -> Result<Workspace, ReconcilerError> {
    pass.record_and_persist(Outcome::Progressing {
        msg: "Initializing".to_string(),
    })
    .await?;

    let fetched = match pass.ctx.fetcher.fetch(&pass.artifact).await {
        Ok(fetched) => fetched,
        Err(e) => {
            let msg = e.to_string();
            pass.fail(Reason::ArtifactFailed, msg);
            return Err(e.into());
        }
    };

    let request = UploadAndExtractRequest {
        namespace: pass.terraform.namespace_or_default().to_string(),
        name: pass.terraform.name().to_string(),
        tar_gz: fetched.tarball,
        path: pass.terraform.spec.path.clone(),
    };
    let uploaded = match runner.upload_and_extract(request).await {
        Ok(reply) => reply,
        Err(status) => {
            return Err(pass.fail(
                Reason::ArtifactFailed,
                rpc_error("failed to upload the artifact", &status),
            ))
        }
    };
    debug!(working_dir = %uploaded.working_dir, "Artifact extracted on runner");

    match initialize(pass, runner, &uploaded.working_dir).await {
        Ok(instance) => Ok(Workspace {
            instance,
            working_dir: uploaded.working_dir,
            tmp_dir: uploaded.tmp_dir,
        }),
        Err(e) => {
            cleanup(runner, &uploaded.tmp_dir).await;
            Err(e)
        }
    }
}

async fn initialize(
    pass: &mut Pass<'_>,
    runner: &dyn RunnerApi,
    working_dir: &str,
) -> Result<String, ReconcilerError> {
    let backend = inputs::backend_config(&pass.terraform);
    match &backend {
        Some(hcl) => {
            let request = WriteBackendConfigRequest {
                dir_path: working_dir.to_string(),
                backend_config: hcl.clone().into_bytes(),
            };
            match runner.write_backend_config(request).await {
                Ok(reply) => debug!(message = %reply.message, "Wrote backend config"),
                Err(status) => {
                    return Err(pass.fail(
                        Reason::TfExecInitFailed,
                        rpc_error("error writing backend config", &status),
                    ))
                }
            }
        }
        None => info!("Backend configuration is disabled"),
    }

    let cli_config_file = process_cli_config(pass, runner, working_dir).await?;

    let terraform = serde_json::to_vec(&pass.terraform)
        .map_err(|e| pass.fail(Reason::TfExecNewFailed, format!("failed to encode the resource: {e}")))?;

    let request = NewTerraformRequest {
        working_dir: working_dir.to_string(),
        exec_path: String::new(),
        instance_id: pass.loop_id.clone(),
        terraform,
        workspace: pass.terraform.spec.workspace.clone(),
    };
    let instance = match runner.new_terraform(request).await {
        Ok(reply) => reply.id,
        Err(status) => {
            return Err(pass.fail(
                Reason::TfExecNewFailed,
                rpc_error("error running NewTerraform", &status),
            ))
        }
    };

    if let Some(file_path) = cli_config_file {
        let request = SetEnvRequest {
            tf_instance: instance.clone(),
            envs: HashMap::from([(TF_CLI_CONFIG_FILE_ENV.to_string(), file_path)]),
        };
        if let Err(status) = runner.set_env(request).await {
            return Err(pass.fail(
                Reason::TfExecInitFailed,
                rpc_error("error setting env for Terraform", &status),
            ));
        }
    }

    generate_vars(pass, runner, working_dir).await?;

    let request = InitRequest {
        tf_instance: instance.clone(),
        upgrade: pass.terraform.spec.upgrade_on_init,
        force_copy: backend.is_some(),
    };
    if let Err(status) = runner.init(request).await {
        return Err(pass.fail(
            Reason::TfExecInitFailed,
            rpc_error("error running Init", &status),
        ));
    }
    info!(tf_instance = %instance, "Terraform initialized");

    force_unlock(pass, runner, &instance).await?;
    Ok(instance)
}

/// Ships the CLI configuration secret to the runner, returning the file it was written to
async fn process_cli_config(
    pass: &mut Pass<'_>,
    runner: &dyn RunnerApi,
    working_dir: &str,
) -> Result<Option<String>, ReconcilerError> {
    let Some(reference) = pass.terraform.spec.cli_config_secret_ref.clone() else {
        return Ok(None);
    };
    let owner_namespace = pass.terraform.namespace_or_default().to_string();
    let namespace = reference.namespace.unwrap_or_else(|| owner_namespace.clone());

    if pass.ctx.config.no_cross_namespace_refs && namespace != owner_namespace {
        let msg = format!(
            "cannot access secret {namespace}/{}, cross-namespace references have been disabled",
            reference.name
        );
        let revision = pass.revision().to_string();
        pass.record(Outcome::NotReady {
            revision,
            reason: Reason::AccessDenied,
            msg: msg.clone(),
        });
        return Err(ReconcilerError::AccessDenied(msg));
    }

    let request = ProcessCliConfigRequest {
        dir_path: working_dir.to_string(),
        namespace,
        name: reference.name,
    };
    match runner.process_cli_config(request).await {
        Ok(reply) => Ok(Some(reply.file_path)),
        Err(status) => Err(pass.fail(
            Reason::TfExecNewFailed,
            format!("cannot process cli config: {}", status.message()),
        )),
    }
}

async fn generate_vars(
    pass: &mut Pass<'_>,
    runner: &dyn RunnerApi,
    working_dir: &str,
) -> Result<(), ReconcilerError> {
    let vars = match inputs::resolve_vars(pass.ctx.cluster.as_ref(), &pass.terraform).await {
        Ok(vars) => vars,
        Err(InputError::Cluster(e)) => return Err(e.into()),
        Err(e) => return Err(pass.fail(Reason::VarsGenerationFailed, e.to_string())),
    };
    let vars = serde_json::to_vec(&vars)
        .map_err(|e| pass.fail(Reason::VarsGenerationFailed, InputError::from(e).to_string()))?;

    let request = GenerateVarsForTfRequest {
        working_dir: working_dir.to_string(),
        vars,
    };
    match runner.generate_vars_for_tf(request).await {
        Ok(reply) => {
            debug!(message = %reply.message, "Generated variables file");
            Ok(())
        }
        Err(status) => Err(pass.fail(
            Reason::VarsGenerationFailed,
            rpc_error("error generating vars", &status),
        )),
    }
}

/// Releases a stuck state lock when `tfstate.forceUnlock` asks for it
async fn force_unlock(
    pass: &mut Pass<'_>,
    runner: &dyn RunnerApi,
    instance: &str,
) -> Result<(), ReconcilerError> {
    let Some(lock_identifier) = LifecyclePolicy::new(&pass.terraform)
        .force_unlock_target()
        .map(str::to_string)
    else {
        return Ok(());
    };
    info!(lock_identifier = %lock_identifier, "Force unlocking Terraform state");
    let request = ForceUnlockRequest {
        tf_instance: instance.to_string(),
        lock_identifier: lock_identifier.clone(),
    };
    if let Err(status) = runner.force_unlock(request).await {
        return Err(pass.fail(
            Reason::TfExecInitFailed,
            rpc_error("error running ForceUnlock", &status),
        ));
    }
    pass.record_and_persist(Outcome::ForceUnlocked {
        msg: format!("Terraform Force Unlock with Lock Identifier: {lock_identifier}"),
    })
    .await
}

/// Removes the runner's temporary directory; failures are only logged
pub async fn cleanup(runner: &dyn RunnerApi, tmp_dir: &str) {
    if tmp_dir.is_empty() {
        return;
    }
    match runner
        .cleanup_dir(CleanupDirRequest {
            tmp_dir: tmp_dir.to_string(),
        })
        .await
    {
        Ok(reply) => debug!(message = %reply.message, "Cleaned up runner directory"),
        Err(status) => warn!(tmp_dir, error = %status.message(), "Failed to clean up runner directory"),
    }
}
