//! # Lifecycle Policy
//!
//! Pure decisions over a Terraform resource: whether to plan, apply, detect
//! drift, retry, or wait for the next interval. Nothing here performs I/O.

mod duration;

pub use duration::parse_duration;

use crate::constants::{
    APPROVE_PLAN_AUTO, APPROVE_PLAN_DISABLE, DEFAULT_MAX_RETRY_INTERVAL_SECS,
    DEFAULT_RETRY_INTERVAL_SECS, REPLAN_PREFIX,
};
use crate::crd::{
    ConditionType, ForceUnlock, Reason, RetryStrategy, Terraform, TerraformSpec, TerraformStatus,
};
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::time::Duration;
use tracing::warn;

/// Result of the interval gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalGate {
    Proceed,
    /// Nothing to do until the interval elapses
    Wait(Duration),
}

/// Read-only view over a resource used to take lifecycle decisions
#[derive(Debug)]
pub struct LifecyclePolicy<'a> {
    spec: &'a TerraformSpec,
    status: Cow<'a, TerraformStatus>,
    generation: i64,
    deleting: bool,
}

impl<'a> LifecyclePolicy<'a> {
    pub fn new(terraform: &'a Terraform) -> Self {
        let status = match &terraform.status {
            Some(status) => Cow::Borrowed(status),
            None => Cow::Owned(TerraformStatus::default()),
        };
        Self {
            spec: &terraform.spec,
            status,
            generation: terraform.generation(),
            deleting: terraform.is_deleting(),
        }
    }

    fn pending(&self) -> &str {
        &self.status.plan.pending
    }

    /// A new plan is due when forced or when nothing is pending
    pub fn should_plan(&self) -> bool {
        self.spec.force || self.pending().is_empty()
    }

    /// Whether the pending plan may be applied now
    pub fn should_apply(&self) -> bool {
        if self.spec.force {
            return true;
        }
        let approve = self.spec.approve_plan.as_str();
        if approve.is_empty() {
            return false;
        }
        let pending = self.pending();
        if approve == APPROVE_PLAN_AUTO && !pending.is_empty() {
            return true;
        }
        if approve == pending {
            return true;
        }
        // A prefix of the pending plan id approves it too
        !pending.is_empty() && pending.starts_with(approve)
    }

    pub fn force_or_auto_apply(&self) -> bool {
        self.spec.force || self.spec.approve_plan == APPROVE_PLAN_AUTO
    }

    /// A plan is pending and nobody approved it
    pub fn awaiting_approval(&self) -> bool {
        !self.pending().is_empty() && !self.force_or_auto_apply() && !self.should_apply()
    }

    /// Periodic interval, or `None` when it is zero or unparsable
    pub fn interval(&self) -> Option<Duration> {
        match parse_duration(&self.spec.interval) {
            Ok(interval) if !interval.is_zero() => Some(interval),
            Ok(_) => None,
            Err(e) => {
                warn!(interval = %self.spec.interval, error = %e, "Ignoring invalid interval");
                None
            }
        }
    }

    /// Decides whether a pass should run now or wait for the interval
    pub fn should_reconcile(&self, now: DateTime<Utc>) -> IntervalGate {
        if self.spec.force || self.deleting {
            return IntervalGate::Proceed;
        }
        let Some(last_plan_at) = self
            .status
            .last_plan_at
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
        else {
            return IntervalGate::Proceed;
        };
        if self.status.observed_generation != Some(self.generation) {
            return IntervalGate::Proceed;
        }
        if !self.pending().is_empty() || self.should_apply() {
            return IntervalGate::Proceed;
        }
        let Some(interval) = self.interval() else {
            return IntervalGate::Proceed;
        };

        let next = last_plan_at + chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::zero());
        match (next - now).to_std() {
            Ok(requeue) if !requeue.is_zero() => IntervalGate::Wait(requeue.min(interval)),
            _ => IntervalGate::Proceed,
        }
    }

    /// `approvePlan: re<plan id>` discards the pending plan once a new revision arrives
    pub fn clears_pending_for_replan(&self, revision: &str) -> bool {
        let approve = self.spec.approve_plan.as_str();
        revision != self.status.last_attempted_revision
            && !self.should_apply()
            && approve.starts_with(REPLAN_PREFIX)
            && format!("re{}", self.pending()).starts_with(approve)
    }

    /// Plan-only resources replan whenever the revision changes
    pub fn clears_pending_for_plan_only(&self, revision: &str) -> bool {
        self.spec.plan_only && revision != self.status.last_attempted_revision
    }

    /// Whether another failed pass is allowed
    pub fn should_retry(&self) -> bool {
        match &self.spec.remediation {
            None => true,
            Some(remediation) if remediation.retries < 0 => true,
            Some(remediation) => self.status.reconciliation_failures < remediation.retries,
        }
    }

    /// Delay before retrying a failed pass
    pub fn retry_interval(&self) -> Duration {
        let base = self
            .spec
            .retry_interval
            .as_deref()
            .and_then(|d| parse_duration(d).ok())
            .unwrap_or(Duration::from_secs(DEFAULT_RETRY_INTERVAL_SECS));

        if self.spec.retry_strategy != RetryStrategy::ExponentialBackoff {
            return base;
        }

        let max = self
            .spec
            .max_retry_interval
            .as_deref()
            .and_then(|d| parse_duration(d).ok())
            .unwrap_or(Duration::from_secs(DEFAULT_MAX_RETRY_INTERVAL_SECS));
        let failures = u32::try_from(self.status.reconciliation_failures.max(0)).unwrap_or(u32::MAX);
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        base.checked_mul(factor).map_or(max, |interval| interval.min(max))
    }

    /// Drift detection runs only once the current revision has been fully handled
    pub fn should_detect_drift(&self, revision: &str) -> bool {
        if self.spec.disable_drift_detection || self.spec.destroy {
            return false;
        }
        if self.spec.approve_plan == APPROVE_PLAN_DISABLE {
            return true;
        }

        let status = &self.status;
        if status.last_applied_revision.is_empty()
            && status.last_planned_revision.is_empty()
            && status.last_attempted_revision.is_empty()
        {
            return false;
        }

        let nothing_pending = self.pending().is_empty();
        let attempted_is_current = status.last_attempted_revision == revision;
        let planned_is_current = status.last_planned_revision == revision;
        let applied_is_current = status.last_applied_revision == revision;

        (attempted_is_current && applied_is_current && planned_is_current && nothing_pending)
            || (attempted_is_current && planned_is_current && nothing_pending)
    }

    pub fn always_cleanup_runner_pod(&self) -> bool {
        self.spec.always_cleanup_runner_pod.unwrap_or(true)
    }

    /// Revision or generation moved since the last pass
    pub fn retry_budget_should_reset(&self, revision: &str) -> bool {
        revision != self.status.last_attempted_revision
            || self.status.last_attempted_generation != Some(self.generation)
    }

    /// Lock to release after init. `yes` only releases the pending lock when
    /// `lockIdentifier` names it; `auto` releases any pending lock.
    pub fn force_unlock_target(&self) -> Option<&str> {
        let tf_state = self.spec.tf_state.as_ref()?;
        let pending = self.status.lock.pending.as_str();
        if pending.is_empty() {
            return None;
        }
        match tf_state.force_unlock {
            ForceUnlock::Auto => Some(pending),
            ForceUnlock::Yes if tf_state.lock_identifier == pending => Some(pending),
            ForceUnlock::Yes | ForceUnlock::No => None,
        }
    }

    /// Health checks run after the first successful apply and again after every failed round
    pub fn should_run_health_checks(&self) -> bool {
        if self.spec.health_checks.is_empty() {
            return false;
        }
        let reason_of = |condition_type| {
            self.status
                .condition_of(condition_type)
                .and_then(|c| c.reason.as_deref())
        };
        match reason_of(ConditionType::HealthCheck) {
            Some(reason) => reason == Reason::HealthChecksFailed.as_str(),
            None => reason_of(ConditionType::Apply) == Some(Reason::AppliedSucceed.as_str()),
        }
    }
}
