//! Drift detection: a refresh-only comparison of live infrastructure against state.

use super::types::{locked_outcome, plan_lock_id, rpc_error, Pass, ReconcilerError};
use super::workspace::Workspace;
use crate::constants::TF_DRIFT_FILENAME;
use crate::crd::{Outcome, Reason};
use crate::runner::RunnerApi;
use runner_proto::{PlanRequest, ShowPlanFileRawRequest};
use tracing::info;

/// Terraform 1.1.9 appends this to every plan that only changes outputs
const OUTPUT_ONLY_NOTICE: &str = "You can apply this plan to save these new output values to the Terraform\nstate, without changing any real infrastructure.";

/// Plans into the drift file. Returns whether drift was found; the Ready
/// condition carries the human readable plan when it was.
pub async fn detect_drift(
    pass: &mut Pass<'_>,
    runner: &dyn RunnerApi,
    workspace: &Workspace,
) -> Result<bool, ReconcilerError> {
    info!("Calling drift detection");
    let request = PlanRequest {
        tf_instance: workspace.instance.clone(),
        out: TF_DRIFT_FILENAME.to_string(),
        refresh: true,
        destroy: false,
        targets: pass.terraform.spec.targets.clone(),
        source_ref_root_dir: workspace.tmp_dir.clone(),
    };
    let reply = match runner.plan(request).await {
        Ok(reply) => reply,
        Err(status) => {
            if let Some(lock_id) = plan_lock_id(&status) {
                pass.record(locked_outcome(lock_id));
            }
            return Err(pass.fail(
                Reason::DriftDetectionFailed,
                rpc_error("error running Plan", &status),
            ));
        }
    };

    let revision = pass.revision().to_string();
    if !reply.drifted {
        info!("No drift detected");
        pass.record(Outcome::NoDrift {
            revision,
            msg: "No drift".to_string(),
        });
        return Ok(false);
    }

    let raw = match runner
        .show_plan_file_raw(ShowPlanFileRawRequest {
            tf_instance: workspace.instance.clone(),
            filename: TF_DRIFT_FILENAME.to_string(),
        })
        .await
    {
        Ok(reply) => reply.raw_output,
        Err(status) => {
            return Err(pass.fail(
                Reason::DriftDetectionFailed,
                rpc_error("error running ShowPlanFileRaw", &status),
            ))
        }
    };

    info!("Drift detected");
    pass.record(Outcome::DriftDetected {
        revision,
        reason: Reason::DriftDetected,
        msg: strip_output_only_notice(&raw),
    });
    Ok(true)
}

fn strip_output_only_notice(raw: &str) -> String {
    raw.replacen(OUTPUT_ONLY_NOTICE, "", 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_output_only_notice() {
        let raw = format!("Changes to Outputs:\n  + x = 1\n\n{OUTPUT_ONLY_NOTICE}\n");
        assert_eq!(
            strip_output_only_notice(&raw),
            "Changes to Outputs:\n  + x = 1\n\n\n"
        );
        assert_eq!(strip_output_only_notice("no notice"), "no notice");
    }
}
