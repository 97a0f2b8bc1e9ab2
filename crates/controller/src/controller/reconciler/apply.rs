//! Applying the pending plan.

use super::types::{apply_lock_id, locked_outcome, rpc_error, Pass, ReconcilerError};
use super::workspace::Workspace;
use crate::constants::TF_PLAN_FILENAME;
use crate::crd::{Outcome, Reason};
use crate::runner::RunnerApi;
use runner_proto::{ApplyRequest, DestroyRequest, LoadTfPlanRequest};
use tracing::info;

pub async fn apply(
    pass: &mut Pass<'_>,
    runner: &dyn RunnerApi,
    workspace: &Workspace,
) -> Result<(), ReconcilerError> {
    info!("Calling apply");
    pass.record_and_persist(Outcome::Progressing {
        msg: "Applying".to_string(),
    })
    .await?;

    let pending_plan = pass.terraform.status_or_default().plan.pending;
    let request = LoadTfPlanRequest {
        tf_instance: workspace.instance.clone(),
        name: pass.terraform.name().to_string(),
        namespace: pass.terraform.namespace_or_default().to_string(),
        pending_plan,
    };
    if let Err(status) = runner.load_tf_plan(request).await {
        return Err(pass.fail(
            Reason::TfExecApplyFailed,
            rpc_error("error loading plan", &status),
        ));
    }

    let revision = pass.revision().to_string();
    pass.record_and_persist(Outcome::Applying {
        revision: revision.clone(),
        msg: "Apply started".to_string(),
    })
    .await?;

    let targets = pass.terraform.spec.targets.clone();
    let result = if pass.terraform.spec.destroy {
        runner
            .destroy(DestroyRequest {
                tf_instance: workspace.instance.clone(),
                targets,
            })
            .await
            .map(|reply| reply.message)
    } else {
        runner
            .apply(ApplyRequest {
                tf_instance: workspace.instance.clone(),
                dir_or_plan: TF_PLAN_FILENAME.to_string(),
                refresh_before_apply: pass.terraform.spec.refresh_before_apply,
                targets,
            })
            .await
            .map(|reply| reply.message)
    };

    match result {
        Ok(message) => info!("apply: {message}"),
        Err(status) => {
            if let Some(lock_id) = apply_lock_id(&status) {
                pass.record(locked_outcome(lock_id));
            }
            let msg = rpc_error("error running Apply", &status);
            pass.record(Outcome::AppliedFailResetPlan {
                revision,
                reason: Reason::TfExecApplyFailed,
                msg: msg.clone(),
            });
            return Err(ReconcilerError::ExecutionFailed(msg));
        }
    }

    let is_destroy = pass.terraform.status_or_default().plan.is_destroy_plan;
    let msg = if is_destroy {
        "Destroy applied successfully"
    } else {
        "Applied successfully"
    };
    pass.record(Outcome::Applied {
        revision,
        is_destroy,
        msg: msg.to_string(),
    });
    Ok(())
}
