//! # Reconcile Pass
//!
//! One pass over a Terraform object: gate on shutdown, finalizer, suspension
//! and interval; resolve the source artifact and dependencies; acquire a
//! runner; then drift-detect, plan, apply, publish outputs and run health
//! checks as the lifecycle policy allows. Status is persisted after every externally
//! visible transition.

use super::types::{requeue_action, Pass, Reconciler, ReconcilerError, RetryClass};
use super::workspace::Workspace;
use super::{apply, drift, finalize, health, outputs, plan, workspace};
use crate::cluster::ensure_finalizer;
use crate::constants::{APPROVE_PLAN_DISABLE, TERRAFORM_FINALIZER};
use crate::crd::{ConditionStatus, ConditionType, Outcome, Reason, Terraform};
use crate::dependency::{check_dependencies, deletion_gate, DeletionGate, DependencyError};
use crate::observability::metrics;
use crate::policy::{IntervalGate, LifecyclePolicy};
use crate::runner::RunnerApi;
use crate::source::{resolve_source_namespace, ArtifactDescriptor, SourceError};
use chrono::Utc;
use kube::runtime::controller::Action;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Entry point invoked by the controller runtime for every queued object
pub async fn reconcile(
    terraform: Arc<Terraform>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let Some(_guard) = ctx.shutdown.admit() else {
        debug!(
            resource.name = terraform.name(),
            "Shutdown in progress, not starting reconciliation"
        );
        return Ok(Action::await_change());
    };

    let name = terraform.name().to_string();
    let namespace = terraform.namespace_or_default().to_string();
    let loop_id = Uuid::new_v4().to_string();
    let span = info_span!(
        "terraform.reconcile",
        resource.name = %name,
        resource.namespace = %namespace,
        reconciliation_loop_id = %loop_id,
        revision = tracing::field::Empty,
    );

    metrics::increment_reconciliations();
    metrics::set_active_reconciliations(ctx.shutdown.active());
    let start = Instant::now();

    let result = reconcile_terraform(&ctx, &namespace, &name, loop_id)
        .instrument(span)
        .await;

    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    metrics::set_active_reconciliations(ctx.shutdown.active().saturating_sub(1));
    result
}

async fn reconcile_terraform(
    ctx: &Reconciler,
    namespace: &str,
    name: &str,
    loop_id: String,
) -> Result<Action, ReconcilerError> {
    ctx.runners.ensure_certificates().await?;

    let Some(terraform) = ctx.cluster.get_terraform(namespace, name).await? else {
        debug!("Terraform object no longer exists");
        return Ok(Action::await_change());
    };
    info!(generation = terraform.generation(), "Reconciliation started");

    if !terraform.has_finalizer(TERRAFORM_FINALIZER) {
        if terraform.is_deleting() {
            return Ok(Action::await_change());
        }
        ensure_finalizer(ctx.cluster.as_ref(), &terraform, TERRAFORM_FINALIZER).await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    if terraform.spec.suspend {
        info!("Reconciliation is suspended for this object");
        return Ok(Action::await_change());
    }

    if let IntervalGate::Wait(remaining) = LifecyclePolicy::new(&terraform).should_reconcile(Utc::now()) {
        info!(
            requeue_after_secs = remaining.as_secs(),
            "Interval has not elapsed since the last plan, skipping"
        );
        metrics::increment_requeues_total("interval");
        return Ok(Action::requeue(remaining));
    }

    let mut terraform = terraform;
    terraform.record(Outcome::Reconciling {
        msg: "Fulfilling prerequisites".to_string(),
    });
    super::status::persist_status(ctx.cluster.as_ref(), &mut terraform).await?;

    if terraform.is_deleting() {
        if let DeletionGate::Blocked(dependents) = deletion_gate(&terraform) {
            let msg = format!(
                "Deletion in progress, but blocked. Please delete {} to resume ...",
                dependents.join(", ")
            );
            info!("{msg}");
            terraform.record(Outcome::NotReady {
                revision: String::new(),
                reason: Reason::DeletionBlockedByDependants,
                msg,
            });
            super::status::persist_status(ctx.cluster.as_ref(), &mut terraform).await?;
            return Ok(Action::requeue(LifecyclePolicy::new(&terraform).retry_interval()));
        }
    }

    let artifact = match resolve_artifact(ctx, &mut terraform).await? {
        ControlFlow::Continue(artifact) => artifact,
        ControlFlow::Break(action) => return Ok(action),
    };
    tracing::Span::current().record("revision", artifact.revision.as_str());

    let mut pass = Pass {
        ctx,
        terraform,
        artifact,
        loop_id,
        cancel: CancellationToken::new(),
    };
    match prepare(&mut pass).await? {
        ControlFlow::Continue(()) => {}
        ControlFlow::Break(action) => return Ok(action),
    }

    let session = ctx
        .runners
        .acquire(&pass.terraform, pass.revision(), &pass.cancel)
        .await
        .inspect_err(|e| error!(error = %e, "Failed to acquire a runner"))?;

    let result = run_with_runner(&mut pass, session.client()).await;

    let cleanup = LifecyclePolicy::new(&pass.terraform).always_cleanup_runner_pod();
    session.close(cleanup, &pass.cancel).await;
    result
}

/// Resolves the source artifact, recording why the pass cannot continue otherwise
async fn resolve_artifact(
    ctx: &Reconciler,
    terraform: &mut Terraform,
) -> Result<ControlFlow<Action, ArtifactDescriptor>, ReconcilerError> {
    let source_ref = terraform.spec.source_ref.clone();
    let owner_namespace = terraform.namespace_or_default().to_string();
    let lookup = match resolve_source_namespace(
        &source_ref,
        &owner_namespace,
        ctx.config.no_cross_namespace_refs,
    ) {
        Ok(namespace) => ctx.sources.artifact(source_ref.kind, namespace, &source_ref.name).await,
        Err(e) => Err(e),
    };

    let retry_after = LifecyclePolicy::new(terraform).retry_interval();
    let (outcome, flow) = match lookup {
        Ok(Some(artifact)) => {
            let status = terraform.status_or_default();
            if status.ready_reason_in(&[Reason::AccessDenied, Reason::ArtifactFailed]) {
                terraform.record(Outcome::Progressing {
                    msg: "Reconciliation in progress".to_string(),
                });
            }
            return Ok(ControlFlow::Continue(artifact));
        }
        Ok(None) => {
            info!("Source is not ready, artifact not found");
            (
                Outcome::SourceUnavailable {
                    reason: Reason::ArtifactFailed,
                    msg: "Source is not ready, artifact not found".to_string(),
                    stalled: false,
                },
                Ok(ControlFlow::Break(Action::requeue(retry_after))),
            )
        }
        Err(e @ SourceError::AccessDenied { .. }) => {
            error!(error = %e, "Access denied to cross-namespace source");
            (
                Outcome::SourceUnavailable {
                    reason: Reason::AccessDenied,
                    msg: e.to_string(),
                    stalled: true,
                },
                Ok(ControlFlow::Break(Action::await_change())),
            )
        }
        Err(e @ SourceError::NotFound { .. }) => {
            info!(error = %e, "Source not found, retrying");
            (
                Outcome::SourceUnavailable {
                    reason: Reason::ArtifactFailed,
                    msg: e.to_string(),
                    stalled: true,
                },
                Ok(ControlFlow::Break(Action::requeue(retry_after))),
            )
        }
        Err(e) => (
            Outcome::SourceUnavailable {
                reason: Reason::ArtifactFailed,
                msg: format!("could not get Source object: {e}"),
                stalled: false,
            },
            Err(ReconcilerError::Source(e)),
        ),
    };
    terraform.record(outcome);
    super::status::persist_status(ctx.cluster.as_ref(), terraform).await?;
    flow
}

/// Dependency gate, retry budget reset, replan handling and the manual approval halt
async fn prepare(pass: &mut Pass<'_>) -> Result<ControlFlow<Action>, ReconcilerError> {
    let revision = pass.revision().to_string();
    let deleting = pass.terraform.is_deleting();

    if !pass.terraform.spec.depends_on.is_empty() && !deleting {
        let checked = check_dependencies(
            pass.ctx.cluster.as_ref(),
            &pass.terraform,
            &revision,
            pass.ctx.config.no_cross_namespace_refs,
        )
        .await;
        match checked {
            Ok(()) => info!("All dependencies are ready, proceeding with reconciliation"),
            Err(DependencyError::Api(e)) => return Err(e.into()),
            Err(e) => {
                let msg = e.to_string();
                let class = ReconcilerError::from(e).classify();
                let reason = match class {
                    RetryClass::AccessDenied => Reason::AccessDenied,
                    _ => Reason::DependencyNotReady,
                };
                info!(error = %msg, "Dependencies do not meet ready condition");
                pass.record_and_persist(Outcome::NotReady {
                    revision,
                    reason,
                    msg,
                })
                .await?;
                metrics::increment_requeues_total(class.as_str());
                return Ok(ControlFlow::Break(requeue_action(
                    class,
                    &pass.terraform,
                    &pass.ctx.config,
                )));
            }
        }
        let status = pass.terraform.status_or_default();
        if status.ready_reason_in(&[Reason::AccessDenied, Reason::DependencyNotReady]) {
            pass.record(Outcome::Progressing {
                msg: "Reconciliation in progress".to_string(),
            });
        }
    }

    let status = pass.terraform.status_or_default();
    if !status.condition_is(ConditionType::Ready, ConditionStatus::Unknown) {
        let msg = if deleting {
            "Deletion in progress"
        } else {
            "Reconciliation in progress"
        };
        pass.record_and_persist(Outcome::Progressing {
            msg: msg.to_string(),
        })
        .await?;
    }

    if LifecyclePolicy::new(&pass.terraform).retry_budget_should_reset(&revision) {
        info!("Source revision or generation changed, resetting retry budget");
        pass.record_and_persist(Outcome::ResetRetry).await?;
    }

    if deleting {
        return Ok(ControlFlow::Continue(()));
    }

    if LifecyclePolicy::new(&pass.terraform).clears_pending_for_replan(&revision) {
        info!("Source revision changed since the pending plan, replanning");
        pass.record_and_persist(Outcome::DiscardPendingPlan).await?;
    }
    if LifecyclePolicy::new(&pass.terraform).clears_pending_for_plan_only(&revision) {
        info!("Plan-only mode with a new revision, replanning");
        pass.record_and_persist(Outcome::DiscardPendingPlan).await?;
    }
    if LifecyclePolicy::new(&pass.terraform).awaiting_approval() {
        info!("Reconciliation is stopped to wait for a manual approve");
        return Ok(ControlFlow::Break(Action::await_change()));
    }
    Ok(ControlFlow::Continue(()))
}

async fn run_with_runner(
    pass: &mut Pass<'_>,
    runner: &dyn RunnerApi,
) -> Result<Action, ReconcilerError> {
    if pass.terraform.is_deleting() {
        return finalize::finalize(pass, runner).await;
    }

    if !LifecyclePolicy::new(&pass.terraform).should_retry() {
        info!("Resource reached maximum number of retries");
        pass.record_and_persist(Outcome::ReachedLimit).await?;
        return Ok(Action::await_change());
    }

    let result = run_lifecycle(pass, runner).await;
    match &result {
        Ok(()) => pass.record_and_persist(Outcome::ResetRetry).await?,
        // Transient failures leave the status as the pass last wrote it
        Err(e) if e.classify() == RetryClass::Transient => {}
        Err(_) => pass.record_and_persist(Outcome::FailureRecorded).await?,
    }

    match result {
        Ok(()) => {
            info!("Reconciliation completed");
            let policy = LifecyclePolicy::new(&pass.terraform);
            let pending = !pass.terraform.status_or_default().plan.pending.is_empty();
            if pending && !policy.force_or_auto_apply() {
                return Ok(Action::await_change());
            }
            Ok(policy.interval().map_or_else(Action::await_change, Action::requeue))
        }
        Err(e) => {
            let class = e.classify();
            if class == RetryClass::DriftDetected {
                warn!("Drift detected, retrying after the retry interval");
            } else {
                error!(error = %e, "Reconciliation failed");
                metrics::increment_reconciliation_errors();
            }
            metrics::increment_requeues_total(class.as_str());
            Ok(requeue_action(class, &pass.terraform, &pass.ctx.config))
        }
    }
}

/// Runs inside an initialised workspace, removing it afterwards
async fn run_lifecycle(pass: &mut Pass<'_>, runner: &dyn RunnerApi) -> Result<(), ReconcilerError> {
    let workspace = workspace::setup(pass, runner).await?;
    let result = lifecycle(pass, runner, &workspace).await;
    workspace::cleanup(runner, &workspace.tmp_dir).await;
    result
}

async fn lifecycle(
    pass: &mut Pass<'_>,
    runner: &dyn RunnerApi,
    workspace: &Workspace,
) -> Result<(), ReconcilerError> {
    let revision = pass.revision().to_string();

    if LifecyclePolicy::new(&pass.terraform).should_detect_drift(&revision) {
        let drifted = drift::detect_drift(pass, runner, workspace).await?;
        if !drifted {
            let recheck = LifecyclePolicy::new(&pass.terraform).should_run_health_checks();
            if recheck || outputs::outputs_secret_missing(pass).await? {
                let written = outputs::process(pass, runner, workspace).await?;
                if recheck {
                    health::check(pass, &written).await?;
                }
            }
            return Ok(());
        }
        if !LifecyclePolicy::new(&pass.terraform).force_or_auto_apply() {
            return Err(ReconcilerError::DriftDetected);
        }
        pass.persist().await?;
    }

    if pass.terraform.spec.approve_plan == APPROVE_PLAN_DISABLE {
        info!("Approve plan is disabled, reconciliation ends here");
        return Ok(());
    }

    if LifecyclePolicy::new(&pass.terraform).should_plan() {
        plan::plan(pass, runner, workspace).await?;
        pass.persist().await?;
    }

    if LifecyclePolicy::new(&pass.terraform).should_apply() {
        apply::apply(pass, runner, workspace).await?;
        pass.persist().await?;
    } else {
        info!("Plan not approved, skipping apply");
    }

    let written = outputs::process(pass, runner, workspace).await?;
    if LifecyclePolicy::new(&pass.terraform).should_run_health_checks() {
        health::check(pass, &written).await?;
    }
    pass.record(Outcome::Settled);
    Ok(())
}
