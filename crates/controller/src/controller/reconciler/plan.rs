//! Planning: produce `tfplan`, run post-planning webhooks and store the plan.

use super::types::{locked_outcome, plan_lock_id, rpc_error, Pass, ReconcilerError};
use super::workspace::Workspace;
use crate::constants::TF_PLAN_FILENAME;
use crate::controller::webhooks::WebhookInvoker;
use crate::crd::{Outcome, Reason};
use crate::policy::LifecyclePolicy;
use crate::runner::RunnerApi;
use runner_proto::{PlanRequest, SaveTfPlanRequest};
use tracing::{error, info};

pub async fn plan(
    pass: &mut Pass<'_>,
    runner: &dyn RunnerApi,
    workspace: &Workspace,
) -> Result<(), ReconcilerError> {
    info!("Calling plan");
    pass.record_and_persist(Outcome::Progressing {
        msg: "Terraform Planning".to_string(),
    })
    .await?;

    let spec = &pass.terraform.spec;
    let destroy =
        spec.destroy || (pass.terraform.is_deleting() && spec.destroy_resources_on_deletion);
    let request = PlanRequest {
        tf_instance: workspace.instance.clone(),
        out: TF_PLAN_FILENAME.to_string(),
        refresh: true,
        destroy,
        targets: spec.targets.clone(),
        source_ref_root_dir: workspace.tmp_dir.clone(),
    };
    let reply = match runner.plan(request).await {
        Ok(reply) => reply,
        Err(status) => {
            if let Some(lock_id) = plan_lock_id(&status) {
                pass.record(locked_outcome(lock_id));
            }
            return Err(pass.fail(
                Reason::TfExecPlanFailed,
                rpc_error("error running Plan", &status),
            ));
        }
    };
    info!(drifted = reply.drifted, "plan: {}", reply.message);

    let revision = pass.revision().to_string();
    if destroy && !reply.plan_created {
        pass.record(Outcome::PlannedNoChanges {
            revision,
            msg: "No objects need to be destroyed".to_string(),
        });
        return Ok(());
    }

    if WebhookInvoker::has_post_planning(&pass.terraform) {
        let result = pass
            .ctx
            .webhooks
            .run_post_planning(&pass.terraform, runner, &workspace.instance)
            .await;
        if let Err(e) = result {
            error!(error = %e, "Post-planning webhook failed");
            let msg = e.to_string();
            pass.record(Outcome::PostPlanningWebhookFailed {
                revision: revision.clone(),
                msg: msg.clone(),
            });
            pass.record(Outcome::NotReady {
                revision,
                reason: Reason::PostPlanningWebhookFailed,
                msg,
            });
            return Err(e.into());
        }
    }

    let request = SaveTfPlanRequest {
        tf_instance: workspace.instance.clone(),
        name: pass.terraform.name().to_string(),
        namespace: pass.terraform.namespace_or_default().to_string(),
        uuid: pass.terraform.metadata.uid.clone().unwrap_or_default(),
        revision: revision.clone(),
        store_readable_plan: pass.terraform.spec.store_readable_plan.as_str().to_string(),
        workspace: pass.terraform.spec.workspace.clone(),
    };
    if let Err(status) = runner.save_tf_plan(request).await {
        return Err(pass.fail(
            Reason::TfExecPlanFailed,
            rpc_error("error saving plan secret", &status),
        ));
    }

    let outcome = if reply.drifted {
        Outcome::PlannedWithChanges {
            force_or_auto: LifecyclePolicy::new(&pass.terraform).force_or_auto_apply(),
            revision,
            msg: "Plan generated".to_string(),
        }
    } else {
        Outcome::PlannedNoChanges {
            revision,
            msg: "Plan no changes".to_string(),
        }
    };
    pass.record(outcome);
    Ok(())
}
