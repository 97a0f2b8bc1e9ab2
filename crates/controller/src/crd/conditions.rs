//! # Lifecycle Outcomes
//!
//! Every status mutation is expressed as an [`Outcome`] and applied with
//! [`Terraform::record`]. String conditions only exist on the persisted
//! [`Condition`] records.

use super::plan_id::{approve_message, plan_id};
use super::{Condition, PlanStatus, Terraform, TerraformStatus};
use crate::constants::MAX_CONDITION_MESSAGE_LENGTH;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionType {
    Ready,
    Reconciling,
    Stalled,
    Plan,
    Apply,
    Output,
    StateLocked,
    HealthCheck,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Ready => "Ready",
            ConditionType::Reconciling => "Reconciling",
            ConditionType::Stalled => "Stalled",
            ConditionType::Plan => "Plan",
            ConditionType::Apply => "Apply",
            ConditionType::Output => "Output",
            ConditionType::StateLocked => "StateLocked",
            ConditionType::HealthCheck => "HealthCheck",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    AccessDenied,
    ArtifactFailed,
    RetryLimitReached,
    DeletionBlockedByDependants,
    DependencyNotReady,
    DriftDetected,
    DriftDetectionFailed,
    NoDrift,
    PlannedWithChanges,
    PlannedNoChanges,
    PostPlanningWebhookFailed,
    TfExecPlanFailed,
    TfExecApplyFailed,
    AppliedSucceed,
    AppliedFail,
    TfExecOutputFailed,
    OutputsWritingFailed,
    OutputsAvailable,
    OutputsWritten,
    TfExecInitFailed,
    TfExecNewFailed,
    LockHeld,
    ForceUnlock,
    VarsGenerationFailed,
    HealthChecksFailed,
    HealthChecksSucceed,
    Progressing,
    ReconciliationFailed,
    ReplanRequested,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::AccessDenied => "AccessDenied",
            Reason::ArtifactFailed => "ArtifactFailed",
            Reason::RetryLimitReached => "RetryLimitReached",
            Reason::DeletionBlockedByDependants => "DeletionBlockedByDependantsReason",
            Reason::DependencyNotReady => "DependencyNotReady",
            Reason::DriftDetected => "DriftDetected",
            Reason::DriftDetectionFailed => "DriftDetectionFailed",
            Reason::NoDrift => "NoDrift",
            Reason::PlannedWithChanges => "TerraformPlannedWithChanges",
            Reason::PlannedNoChanges => "TerraformPlannedNoChanges",
            Reason::PostPlanningWebhookFailed => "PostPlanningWebhookFailed",
            Reason::TfExecPlanFailed => "TFExecPlanFailed",
            Reason::TfExecApplyFailed => "TFExecApplyFailed",
            Reason::AppliedSucceed => "TerraformAppliedSucceed",
            Reason::AppliedFail => "TerraformAppliedFail",
            Reason::TfExecOutputFailed => "TFExecOutputFailed",
            Reason::OutputsWritingFailed => "OutputsWritingFailed",
            Reason::OutputsAvailable => "TerraformOutputsAvailable",
            Reason::OutputsWritten => "TerraformOutputsWritten",
            Reason::TfExecInitFailed => "TFExecInitFailed",
            Reason::TfExecNewFailed => "TFExecNewFailed",
            Reason::LockHeld => "LockHeld",
            Reason::ForceUnlock => "ForceUnlock",
            Reason::VarsGenerationFailed => "VarsGenerationFailed",
            Reason::HealthChecksFailed => "HealthChecksFailed",
            Reason::HealthChecksSucceed => "HealthChecksSucceed",
            Reason::Progressing => "Progressing",
            Reason::ReconciliationFailed => "ReconciliationFailed",
            Reason::ReplanRequested => "ReplanRequested",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event and the status transition it implies
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Reconciling=True while prerequisites are checked
    Reconciling { msg: String },
    /// Ready=Unknown while work is in flight
    Progressing { msg: String },
    NotReady {
        revision: String,
        reason: Reason,
        msg: String,
    },
    Stalled { reason: Reason, msg: String },
    /// Ready=True once a pass completes without a more specific outcome
    Ready {
        revision: String,
        reason: Reason,
        msg: String,
    },
    PlannedWithChanges {
        revision: String,
        force_or_auto: bool,
        msg: String,
    },
    PlannedNoChanges { revision: String, msg: String },
    PostPlanningWebhookFailed { revision: String, msg: String },
    Applying { revision: String, msg: String },
    Applied {
        revision: String,
        is_destroy: bool,
        msg: String,
    },
    AppliedFailResetPlan {
        revision: String,
        reason: Reason,
        msg: String,
    },
    OutputsAvailable { names: Vec<String>, msg: String },
    OutputsWritten { revision: String, msg: String },
    DriftDetected {
        revision: String,
        reason: Reason,
        msg: String,
    },
    NoDrift { revision: String, msg: String },
    StateLocked { lock_id: String, msg: String },
    /// StateLocked=False after the pending lock was force-unlocked
    ForceUnlocked { msg: String },
    HealthChecksFailed { msg: String },
    HealthChecksSucceeded { msg: String },
    /// Ready=False for a missing or forbidden source. Revisions and the
    /// observed generation are left alone.
    SourceUnavailable {
        reason: Reason,
        msg: String,
        stalled: bool,
    },
    /// Forgets the pending plan so the next pass plans again
    DiscardPendingPlan,
    /// Ends a successful pass: an Unknown Ready flips to True unless a plan
    /// awaits approval or work is still in flight
    Settled,
    ReachedLimit,
    ResetRetry,
    /// A failed pass that counts against the remediation budget
    FailureRecorded,
}

/// Truncates a condition message to the persisted maximum, marking the cut with `...`
pub fn trim_message(message: &str) -> String {
    trim_to(message, MAX_CONDITION_MESSAGE_LENGTH)
}

fn trim_to(message: &str, limit: usize) -> String {
    let limit = limit.max(3);
    match message.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &message[..idx]),
        None => message.to_string(),
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

impl TerraformStatus {
    /// Sets a condition, keeping its transition time unless the status changes
    pub fn set_condition(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: Reason,
        message: &str,
    ) {
        let message = trim_message(message);
        match self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition_type.as_str())
        {
            Some(existing) => {
                if existing.status != status.as_str() {
                    existing.status = status.as_str().to_string();
                    existing.last_transition_time = Some(now_rfc3339());
                }
                existing.reason = Some(reason.as_str().to_string());
                existing.message = Some(message);
            }
            None => self.conditions.push(Condition {
                r#type: condition_type.as_str().to_string(),
                status: status.as_str().to_string(),
                last_transition_time: Some(now_rfc3339()),
                reason: Some(reason.as_str().to_string()),
                message: Some(message),
            }),
        }
    }

    pub fn remove_condition(&mut self, condition_type: ConditionType) {
        self.conditions
            .retain(|c| c.r#type != condition_type.as_str());
    }

    pub fn condition_of(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.condition(condition_type.as_str())
    }

    pub fn condition_is(&self, condition_type: ConditionType, status: ConditionStatus) -> bool {
        self.condition_of(condition_type)
            .is_some_and(|c| c.status == status.as_str())
    }

    /// Ready carries one of the given reasons
    pub fn ready_reason_in(&self, reasons: &[Reason]) -> bool {
        self.condition_of(ConditionType::Ready)
            .and_then(|c| c.reason.as_deref())
            .is_some_and(|reason| reasons.iter().any(|r| r.as_str() == reason))
    }

    pub fn is_ready(&self) -> bool {
        self.condition_is(ConditionType::Ready, ConditionStatus::True)
    }

    /// Drift was detected after the last successful apply
    pub fn has_drift(&self) -> bool {
        let Some(drift_at) = self.last_drift_detected_at.as_deref().and_then(parse_time) else {
            return false;
        };
        self.condition_of(ConditionType::Apply)
            .filter(|c| c.status == ConditionStatus::True.as_str())
            .and_then(|c| c.last_transition_time.as_deref())
            .and_then(parse_time)
            .is_some_and(|applied_at| drift_at > applied_at)
    }

    fn set_readiness(
        &mut self,
        generation: i64,
        status: ConditionStatus,
        reason: Reason,
        message: &str,
        revision: &str,
    ) {
        self.set_condition(ConditionType::Ready, status, reason, message);
        self.last_attempted_generation = Some(generation);
        if status != ConditionStatus::False {
            self.observed_generation = Some(generation);
        }
        if !revision.is_empty() {
            self.last_attempted_revision = revision.to_string();
        }
    }

    fn set_attempted_and_planned(&mut self, revision: &str) {
        if !revision.is_empty() {
            self.last_attempted_revision = revision.to_string();
            self.last_planned_revision = revision.to_string();
        }
    }
}

impl Terraform {
    /// Applies a lifecycle outcome to the in-memory status
    pub fn record(&mut self, outcome: Outcome) {
        let generation = self.generation();
        let destroy = self.spec.destroy
            || (self.is_deleting() && self.spec.destroy_resources_on_deletion);
        let plan_only = self.spec.plan_only;
        let status = self.status.get_or_insert_with(TerraformStatus::default);

        match outcome {
            Outcome::Reconciling { msg } => status.set_condition(
                ConditionType::Reconciling,
                ConditionStatus::True,
                Reason::Progressing,
                &msg,
            ),
            Outcome::Progressing { msg } => status.set_condition(
                ConditionType::Ready,
                ConditionStatus::Unknown,
                Reason::Progressing,
                &msg,
            ),
            Outcome::NotReady {
                revision,
                reason,
                msg,
            } => status.set_readiness(generation, ConditionStatus::False, reason, &msg, &revision),
            Outcome::Stalled { reason, msg } => status.set_condition(
                ConditionType::Stalled,
                ConditionStatus::True,
                reason,
                &msg,
            ),
            Outcome::Ready {
                revision,
                reason,
                msg,
            } => status.set_readiness(generation, ConditionStatus::True, reason, &msg, &revision),
            Outcome::PlannedWithChanges {
                revision,
                force_or_auto,
                msg,
            } => {
                let pending = plan_id(&revision);
                status.set_condition(
                    ConditionType::Plan,
                    ConditionStatus::True,
                    Reason::PlannedWithChanges,
                    &msg,
                );
                let is_drift_detection_plan = status.has_drift();
                status.plan = PlanStatus {
                    last_applied: std::mem::take(&mut status.plan.last_applied),
                    pending: pending.clone(),
                    is_destroy_plan: destroy,
                    is_drift_detection_plan,
                };
                status.set_attempted_and_planned(&revision);
                status.last_plan_at = Some(now_rfc3339());

                let ready_message = if plan_only {
                    format!("{msg}: This object is in the plan only mode.")
                } else if force_or_auto {
                    msg
                } else {
                    approve_message(&pending, &msg)
                };
                status.set_readiness(
                    generation,
                    ConditionStatus::Unknown,
                    Reason::PlannedWithChanges,
                    &ready_message,
                    &revision,
                );
            }
            Outcome::PlannedNoChanges { revision, msg } => {
                status.set_condition(
                    ConditionType::Plan,
                    ConditionStatus::False,
                    Reason::PlannedNoChanges,
                    &msg,
                );
                status.plan = PlanStatus {
                    last_applied: std::mem::take(&mut status.plan.last_applied),
                    pending: String::new(),
                    is_destroy_plan: destroy,
                    is_drift_detection_plan: false,
                };
                status.set_attempted_and_planned(&revision);
                status.last_plan_at = Some(now_rfc3339());
                status.set_readiness(
                    generation,
                    ConditionStatus::True,
                    Reason::PlannedNoChanges,
                    &format!("{msg}: {revision}"),
                    &revision,
                );
            }
            Outcome::PostPlanningWebhookFailed { revision, msg } => {
                status.set_condition(
                    ConditionType::Plan,
                    ConditionStatus::False,
                    Reason::PostPlanningWebhookFailed,
                    &msg,
                );
                status.plan = PlanStatus {
                    last_applied: std::mem::take(&mut status.plan.last_applied),
                    pending: String::new(),
                    is_destroy_plan: destroy,
                    is_drift_detection_plan: false,
                };
                status.set_attempted_and_planned(&revision);
            }
            Outcome::Applying { revision, msg } => {
                status.set_condition(
                    ConditionType::Apply,
                    ConditionStatus::Unknown,
                    Reason::Progressing,
                    &msg,
                );
                if !revision.is_empty() {
                    status.last_attempted_revision = revision;
                }
            }
            Outcome::Applied {
                revision,
                is_destroy,
                msg,
            } => {
                status.set_condition(
                    ConditionType::Apply,
                    ConditionStatus::True,
                    Reason::AppliedSucceed,
                    &msg,
                );
                if status.plan.is_drift_detection_plan {
                    status.last_applied_by_drift_detection_at = Some(now_rfc3339());
                }
                status.plan = PlanStatus {
                    last_applied: std::mem::take(&mut status.plan.pending),
                    pending: String::new(),
                    is_destroy_plan: is_destroy,
                    is_drift_detection_plan: false,
                };
                if !revision.is_empty() {
                    status.last_applied_revision = revision.clone();
                }
                status.set_readiness(
                    generation,
                    ConditionStatus::Unknown,
                    Reason::AppliedSucceed,
                    &format!("{msg}: {revision}"),
                    &revision,
                );
            }
            Outcome::AppliedFailResetPlan {
                revision,
                reason,
                msg,
            } => {
                status.set_condition(
                    ConditionType::Apply,
                    ConditionStatus::False,
                    Reason::AppliedFail,
                    &msg,
                );
                status.set_readiness(generation, ConditionStatus::False, reason, &msg, &revision);
                status.plan.pending.clear();
            }
            Outcome::OutputsAvailable { mut names, msg } => {
                names.sort();
                status.set_condition(
                    ConditionType::Output,
                    ConditionStatus::True,
                    Reason::OutputsAvailable,
                    &msg,
                );
                status.available_outputs = names;
            }
            Outcome::OutputsWritten { revision, msg } => {
                status.set_condition(
                    ConditionType::Output,
                    ConditionStatus::True,
                    Reason::OutputsWritten,
                    &msg,
                );
                status.set_readiness(
                    generation,
                    ConditionStatus::True,
                    Reason::OutputsWritten,
                    &format!("{msg}: {revision}"),
                    &revision,
                );
            }
            Outcome::DriftDetected {
                revision,
                reason,
                msg,
            } => {
                status.last_drift_detected_at = Some(now_rfc3339());
                status.set_readiness(generation, ConditionStatus::False, reason, &msg, &revision);
            }
            Outcome::NoDrift { revision, msg } => status.set_readiness(
                generation,
                ConditionStatus::True,
                Reason::NoDrift,
                &format!("{msg}: {revision}"),
                &revision,
            ),
            Outcome::StateLocked { lock_id, msg } => {
                status.set_condition(
                    ConditionType::StateLocked,
                    ConditionStatus::True,
                    Reason::LockHeld,
                    &msg,
                );
                status.set_readiness(generation, ConditionStatus::False, Reason::LockHeld, &msg, "");
                if !status.lock.pending.is_empty() && status.lock.last_applied != status.lock.pending {
                    status.lock.last_applied = std::mem::take(&mut status.lock.pending);
                }
                status.lock.pending = lock_id;
            }
            Outcome::ForceUnlocked { msg } => {
                status.set_condition(
                    ConditionType::StateLocked,
                    ConditionStatus::False,
                    Reason::ForceUnlock,
                    &msg,
                );
                if !status.lock.pending.is_empty() && status.lock.last_applied != status.lock.pending {
                    status.lock.last_applied = std::mem::take(&mut status.lock.pending);
                }
                status.lock.pending.clear();
            }
            Outcome::HealthChecksFailed { msg } => status.set_condition(
                ConditionType::HealthCheck,
                ConditionStatus::False,
                Reason::HealthChecksFailed,
                &msg,
            ),
            Outcome::HealthChecksSucceeded { msg } => status.set_condition(
                ConditionType::HealthCheck,
                ConditionStatus::True,
                Reason::HealthChecksSucceed,
                &msg,
            ),
            Outcome::SourceUnavailable {
                reason,
                msg,
                stalled,
            } => {
                if stalled {
                    status.set_condition(ConditionType::Stalled, ConditionStatus::True, reason, &msg);
                }
                status.set_condition(ConditionType::Ready, ConditionStatus::False, reason, &msg);
                status.remove_condition(ConditionType::Reconciling);
            }
            Outcome::DiscardPendingPlan => status.plan.pending.clear(),
            Outcome::Settled => {
                let Some(ready) = status
                    .conditions
                    .iter_mut()
                    .find(|c| c.r#type == ConditionType::Ready.as_str())
                else {
                    return;
                };
                if ready.status != ConditionStatus::Unknown.as_str() {
                    return;
                }
                let reason = ready.reason.as_deref().unwrap_or_default();
                let message = ready.message.as_deref().unwrap_or_default();
                let awaiting_approval = reason == Reason::PlannedWithChanges.as_str()
                    && message.starts_with("Plan generated");
                if awaiting_approval || reason == Reason::Progressing.as_str() {
                    return;
                }
                ready.status = ConditionStatus::True.as_str().to_string();
                ready.last_transition_time = Some(now_rfc3339());
            }
            Outcome::ReachedLimit => {
                status.set_condition(
                    ConditionType::Stalled,
                    ConditionStatus::True,
                    Reason::RetryLimitReached,
                    "Resource reached maximum number of retries.",
                );
                status.remove_condition(ConditionType::Reconciling);
            }
            Outcome::ResetRetry => {
                status.remove_condition(ConditionType::Stalled);
                status.reconciliation_failures = 0;
            }
            Outcome::FailureRecorded => {
                status.reconciliation_failures = status.reconciliation_failures.saturating_add(1);
            }
        }
    }
}
