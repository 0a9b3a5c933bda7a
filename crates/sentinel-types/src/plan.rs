use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::json::JsonValue;

/// Risk tier attached to a step and rolled up into a plan's overall risk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// The atomic unit a capability executes.
///
/// Fields split into essential (the only ones the validator ever sees, via
/// `StrippedStep`) and non-essential (ordering/metadata that the planner and
/// orchestrator need but the validator must not). See
/// `sentinel-runtime::stripper`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionStep {
    // Essential.
    pub step_id: String,
    pub capability: String,
    pub action: String,
    pub parameters: BTreeMap<String, JsonValue>,
    pub risk_level: RiskLevel,

    // Non-essential: stripped before the validator sees the plan.
    pub description: String,
    pub order: u32,
    pub dependencies: Vec<String>,
    pub parallel_group: Option<String>,
    pub rollback_step: Option<String>,
    pub condition: Option<StepCondition>,
    pub metadata: BTreeMap<String, JsonValue>,
}

/// A conditional-execution predicate, evaluated against completed step
/// results before a step runs.
///
/// `field` is a dot-path rooted at `step:<id>.status` or
/// `step:<id>.result....`. See `sentinel-runtime::condition` for the
/// evaluator (fail-closed: any error skips the step).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: JsonValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Neq,
    Gt,
    Lt,
    Contains,
    Exists,
}

/// Ordered set of steps plus planner reasoning, belonging to exactly one job.
///
/// Immutable once accepted by the validator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan_id: Uuid,
    pub job_id: Uuid,
    pub steps: Vec<ExecutionStep>,
    pub reasoning: String,
    pub cost_estimate: Option<f64>,
}

impl ExecutionPlan {
    /// Sorted concatenation of per-step `capability:action[sorted-param-keys]@risk`.
    ///
    /// Structural, not textual: used by the failure handler to detect a
    /// repeated plan after a rejection.
    pub fn fingerprint(&self) -> String {
        let mut parts: Vec<String> = self
            .steps
            .iter()
            .map(|step| {
                let mut keys: Vec<&str> = step.parameters.keys().map(String::as_str).collect();
                keys.sort_unstable();
                format!(
                    "{}:{}[{}]@{}",
                    step.capability,
                    step.action,
                    keys.join(","),
                    step.risk_level.as_str()
                )
            })
            .collect();
        parts.sort_unstable();
        parts.join("|")
    }
}

/// Essential fields of a step, surfaced to the validator. Carries nothing
/// that would let the validator infer ordering, rollback plans, or metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrippedStep {
    pub step_id: String,
    pub capability: String,
    pub action: String,
    pub parameters: BTreeMap<String, JsonValue>,
    pub risk_level: RiskLevel,
}

/// Plan as the validator sees it: plan-id, job-id, and essential step fields
/// only. See `sentinel-runtime::stripper::strip`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrippedPlan {
    pub plan_id: Uuid,
    pub job_id: Uuid,
    pub steps: Vec<StrippedStep>,
}
