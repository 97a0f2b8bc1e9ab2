//! Deletion: optional destroy, secret cleanup, lock release and finalizer removal.

use super::types::{Pass, ReconcilerError};
use super::{apply, plan, workspace};
use crate::cluster::remove_finalizer;
use crate::constants::TERRAFORM_FINALIZER;
use crate::dependency::release_locks;
use crate::runner::RunnerApi;
use kube::runtime::controller::Action;
use runner_proto::FinalizeSecretsRequest;
use tonic::Code;
use tracing::{debug, info, warn};

pub async fn finalize(pass: &mut Pass<'_>, runner: &dyn RunnerApi) -> Result<Action, ReconcilerError> {
    info!("Finalizing Terraform resource");

    if pass.terraform.spec.destroy_resources_on_deletion {
        let result = destroy_resources(pass, runner).await;
        if let Err(e) = result {
            pass.persist().await?;
            return Err(e);
        }
        info!("Resources destroyed on deletion");
    }

    let outputs = pass.terraform.spec.write_outputs_to_secret.as_ref();
    let request = FinalizeSecretsRequest {
        namespace: pass.terraform.namespace_or_default().to_string(),
        name: pass.terraform.name().to_string(),
        workspace: pass.terraform.spec.workspace.clone(),
        has_specified_outputs_secret: outputs.is_some(),
        outputs_secret_name: outputs.map(|o| o.name.clone()).unwrap_or_default(),
    };
    match runner.finalize_secrets(request).await {
        Ok(reply) => info!("finalizing secrets: {}", reply.message),
        Err(status) if status.code() == Code::Internal => return Err(status.into()),
        Err(status) if status.code() == Code::NotFound => {
            debug!("No secrets left to finalize");
        }
        Err(status) => warn!(error = %status.message(), "Failed to finalize secrets"),
    }

    release_locks(pass.ctx.cluster.as_ref(), &pass.terraform).await?;

    let cluster = pass.ctx.cluster.as_ref();
    let namespace = pass.terraform.namespace_or_default();
    if let Some(live) = cluster.get_terraform(namespace, pass.terraform.name()).await? {
        remove_finalizer(cluster, &live, TERRAFORM_FINALIZER).await?;
    }
    info!("Finalizer removed");
    Ok(Action::await_change())
}

async fn destroy_resources(pass: &mut Pass<'_>, runner: &dyn RunnerApi) -> Result<(), ReconcilerError> {
    let workspace = workspace::setup(pass, runner).await?;
    let result = async {
        plan::plan(pass, runner, &workspace).await?;
        pass.persist().await?;
        apply::apply(pass, runner, &workspace).await?;
        pass.persist().await
    }
    .await;
    workspace::cleanup(runner, &workspace.tmp_dir).await;
    result
}
