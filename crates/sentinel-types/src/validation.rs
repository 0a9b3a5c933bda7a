use serde::{Deserialize, Serialize};

use crate::plan::RiskLevel;

/// Overall outcome of validating a plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Rejected,
    NeedsUserApproval,
    NeedsRevision,
}

/// Safety dimension a per-step verdict is classified under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Security,
    Privacy,
    Financial,
    Policy,
    Composite,
    Ethical,
    Legal,
}

/// Validator's per-step judgment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepVerdict {
    pub step_id: String,
    pub category: Category,
    pub reasoning: String,
}

/// Validator's judgment on an entire plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationResult {
    pub verdict: Verdict,
    pub overall_risk: RiskLevel,
    pub reasoning: String,
    pub step_verdicts: Vec<StepVerdict>,
    pub suggested_revisions: Option<String>,
}
