use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::RegexSet;
use sentinel_types::{ChatMessage, ChatRequest, ExecutionPlan, ExecutionStep, LlmAdapter, SentinelError, StepCondition};
use serde::Deserialize;
use uuid::Uuid;
use tracing::debug;

use crate::json_extract::{excerpt, extract_json_object};

/// Why a planning attempt failed, driving the `FailureHandler`'s retry
/// policy. Sealed by construction (no public variant constructors beyond
/// `classify`) so callers must go through the detection logic rather than
/// fabricate a classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlanningFailure {
    MalformedJson,
    ModelRefusal,
    Truncated,
    EmptyOrNonsense,
    Repetitive,
    InfiniteReplanning,
}

impl PlanningFailure {
    /// Retry budget for this failure kind. `None` means fail immediately
    /// with no retry.
    pub fn retry_budget(&self) -> Option<u32> {
        match self {
            Self::MalformedJson => Some(2),
            Self::ModelRefusal => Some(1),
            Self::Truncated => Some(1),
            Self::EmptyOrNonsense => Some(1),
            Self::Repetitive | Self::InfiniteReplanning => None,
        }
    }
}

static REFUSAL_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)i can'?t (help|assist|comply) with that",
        r"(?i)i'?m (not able|unable) to (help|assist|do that)",
        r"(?i)i (must|have to) decline",
        r"(?i)as an ai( language model)?,? i (cannot|can't)",
        r"(?i)this request violates",
    ])
    .expect("refusal pattern regexes are compile-time constants")
});

/// Classifies a raw planner response against the known failure symptoms.
/// Order matters: refusal and emptiness are checked before attempting a
/// JSON parse, since a refusal is rarely valid JSON but should be
/// classified for what it is, not as malformed JSON.
pub fn classify_response(raw: &str) -> Option<PlanningFailure> {
    let trimmed = raw.trim();

    if trimmed.len() < 5 {
        return Some(PlanningFailure::EmptyOrNonsense);
    }

    if REFUSAL_PATTERNS.is_match(trimmed) {
        return Some(PlanningFailure::ModelRefusal);
    }

    if is_truncated(trimmed) {
        return Some(PlanningFailure::Truncated);
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(obj)) => {
            let steps_empty = obj
                .get("steps")
                .and_then(|v| v.as_array())
                .map(|arr| arr.is_empty())
                .unwrap_or(true);
            if steps_empty {
                Some(PlanningFailure::EmptyOrNonsense)
            } else {
                None
            }
        }
        Ok(_) => Some(PlanningFailure::EmptyOrNonsense),
        Err(_) => Some(PlanningFailure::MalformedJson),
    }
}

fn is_truncated(s: &str) -> bool {
    let opens_without_close = (s.starts_with('{') && !balanced(s, '{', '}'))
        || (s.starts_with('[') && !balanced(s, '[', ']'));
    if opens_without_close {
        return true;
    }

    match s.chars().last() {
        Some(c) if c.is_alphanumeric() => true,
        _ => false,
    }
}

fn balanced(s: &str, open: char, close: char) -> bool {
    let mut depth: i64 = 0;
    for c in s.chars() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
        }
    }
    depth == 0
}

/// Tracks revision/replan counters for a single job's planning loop and
/// decides whether another attempt is permitted.
#[derive(Default)]
pub struct FailureHandler {
    attempts_by_kind: std::collections::HashMap<PlanningFailure, u32>,
    revision_cycles: u32,
    replans: u32,
    last_rejected_fingerprint: Option<String>,
}

impl FailureHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consults the symptom table and the job's running counters. Returns
    /// `Ok(())` if a retry is permitted, or a terminal `SentinelError`
    /// otherwise (caller should transition the job to `failed`).
    pub fn admit_retry(&mut self, failure: PlanningFailure) -> Result<(), SentinelError> {
        if self.revision_cycles >= 3 || self.replans >= 2 {
            return Err(SentinelError::provider("infinite replanning: revision or replan budget exhausted"));
        }

        let budget = failure.retry_budget().ok_or_else(|| {
            SentinelError::provider(format!("planning failed with no retry budget: {failure:?}"))
        })?;

        let used = self.attempts_by_kind.entry(failure).or_insert(0);
        if *used >= budget {
            return Err(SentinelError::provider(format!(
                "planning retry budget exhausted for {failure:?} ({used}/{budget})"
            )));
        }
        *used += 1;
        debug!(?failure, attempt = *used, budget, "retrying planning");
        Ok(())
    }

    /// A validator `needs_revision` verdict sent the job back to planning.
    pub fn record_revision_cycle(&mut self) {
        self.revision_cycles += 1;
    }

    /// A single planning attempt was rejected by `classify_response` and
    /// retried. Distinct from a revision cycle: this counts re-attempts
    /// within one planning phase, not bounces back from validation.
    pub fn record_replan(&mut self) {
        self.replans += 1;
    }

    /// Checks a freshly-produced plan's fingerprint against the last
    /// rejected one. Structural equality, not textual.
    pub fn check_repetition(&mut self, plan: &ExecutionPlan) -> Result<(), SentinelError> {
        let fingerprint = plan.fingerprint();
        if self.last_rejected_fingerprint.as_deref() == Some(fingerprint.as_str()) {
            return Err(SentinelError::provider("planner resubmitted a structurally identical plan after rejection"));
        }
        Ok(())
    }

    pub fn record_rejection(&mut self, plan: &ExecutionPlan) {
        self.last_rejected_fingerprint = Some(plan.fingerprint());
    }
}

pub struct Planner {
    adapter: Arc<dyn LlmAdapter>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl Planner {
    pub fn new(adapter: Arc<dyn LlmAdapter>, model: impl Into<String>) -> Self {
        Self { adapter, model: model.into(), temperature: 0.2, max_tokens: 4096 }
    }

    /// Runs one planning attempt. Classification of failure is the caller's
    /// job (via `classify_response`) so the orchestrator can drive the
    /// `FailureHandler` loop without this type owning job-level state.
    pub async fn propose(&self, system_prompt: &str, user_message: &str) -> Result<String, SentinelError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(system_prompt), ChatMessage::user(user_message)],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stop_sequences: Vec::new(),
            tools: None,
        };

        let mut stream = self.adapter.chat(request).await?;
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            collected.push_str(&chunk.content);
            if chunk.done {
                break;
            }
        }
        Ok(collected)
    }
}

#[derive(Deserialize)]
struct PlanInput {
    reasoning: String,
    #[serde(default)]
    cost_estimate: Option<f64>,
    steps: Vec<StepInput>,
}

#[derive(Deserialize)]
struct StepInput {
    step_id: String,
    capability: String,
    action: String,
    #[serde(default)]
    parameters: BTreeMap<String, serde_json::Value>,
    risk_level: sentinel_types::RiskLevel,
    #[serde(default)]
    description: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    parallel_group: Option<String>,
    #[serde(default)]
    rollback_step: Option<String>,
    #[serde(default)]
    condition: Option<StepCondition>,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

/// Parses a planner model's raw JSON response (already known-good per
/// `classify_response`) into an `ExecutionPlan` belonging to `job_id`.
/// `order` is assigned from array position — the planner's output order is
/// its intended execution order.
pub fn parse_plan(raw: &str, job_id: Uuid) -> Result<ExecutionPlan, SentinelError> {
    let candidate = extract_json_object(raw)
        .ok_or_else(|| SentinelError::provider(format!("planner response had no JSON object: {}", excerpt(raw))))?;

    let input: PlanInput = serde_json::from_str(candidate)
        .map_err(|e| SentinelError::provider(format!("planner response failed schema validation ({e}): {}", excerpt(candidate))))?;

    let steps = input
        .steps
        .into_iter()
        .enumerate()
        .map(|(order, step)| ExecutionStep {
            step_id: step.step_id,
            capability: step.capability,
            action: step.action,
            parameters: step.parameters.into_iter().map(|(k, v)| (k, v.into())).collect(),
            risk_level: step.risk_level,
            description: step.description,
            order: order as u32,
            dependencies: step.dependencies,
            parallel_group: step.parallel_group,
            rollback_step: step.rollback_step,
            condition: step.condition,
            metadata: step.metadata.into_iter().map(|(k, v)| (k, v.into())).collect(),
        })
        .collect();

    Ok(ExecutionPlan { plan_id: Uuid::new_v4(), job_id, steps, reasoning: input.reasoning, cost_estimate: input.cost_estimate })
}
