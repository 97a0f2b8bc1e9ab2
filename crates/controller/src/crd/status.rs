//! # Terraform Status
//!
//! Status types persisted on the `Terraform` resource.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status of the Terraform resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TerraformStatus {
    /// Generation of the last pass that completed without failing
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Generation of the last pass that reached a readiness verdict, failed or not
    #[serde(default)]
    pub last_attempted_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Source revision last applied successfully
    #[serde(default)]
    pub last_applied_revision: String,
    /// Source revision of the last reconcile attempt
    #[serde(default)]
    pub last_attempted_revision: String,
    /// Source revision of the last plan
    #[serde(default)]
    pub last_planned_revision: String,
    /// RFC3339 time of the last plan
    #[serde(default)]
    pub last_plan_at: Option<String>,
    #[serde(default)]
    pub last_drift_detected_at: Option<String>,
    #[serde(default)]
    pub last_applied_by_drift_detection_at: Option<String>,
    #[serde(default)]
    pub available_outputs: Vec<String>,
    #[serde(default)]
    pub plan: PlanStatus,
    #[serde(default)]
    pub lock: LockStatus,
    #[serde(default)]
    pub reconciliation_failures: i64,
    /// Value of the reconcile request annotation last handled
    #[serde(default)]
    pub last_handled_reconcile_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanStatus {
    #[serde(default)]
    pub last_applied: String,
    /// Id of the plan waiting to be applied, empty when nothing is pending
    #[serde(default)]
    pub pending: String,
    #[serde(default)]
    pub is_destroy_plan: bool,
    #[serde(default)]
    pub is_drift_detection_plan: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
    #[serde(default)]
    pub last_applied: String,
    #[serde(default)]
    pub pending: String,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

impl TerraformStatus {
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == condition_type)
    }

    pub fn has_pending_plan(&self) -> bool {
        !self.plan.pending.is_empty()
    }
}
