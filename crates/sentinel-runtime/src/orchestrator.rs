use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sentinel_journal::{CheckOutcome, IdempotencyLog};
use sentinel_types::{
    ComponentId, ExecutionPlan, ExecutionStep, IdempotencyKey, Job, JobStatus, JsonValue, Message,
    MessageType, SentinelError, Verdict,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::approval::{ApprovalDecision, ApprovalRegistry};
use crate::budget::{run_with_timeout, BudgetPhase, JobBudgetConfig, TimeoutBudget};
use crate::condition::{evaluate, StepOutcome};
use crate::planner::{classify_response, parse_plan, FailureHandler, Planner};
use crate::router::MessageRouter;

/// How many times a single step is retried after a failed `execute.request`
/// before the job gives up. DESIGN.md records this default.
const DEFAULT_STEP_RETRY_LIMIT: u32 = 1;

fn to_error_json(error: &SentinelError) -> JsonValue {
    serde_json::to_value(error).map(JsonValue::from).unwrap_or(JsonValue::Null)
}

/// Drives one job through `pending -> planning -> validating ->
/// awaiting_approval? -> executing -> completed | failed | cancelled`.
/// Owned exclusively by the worker that claimed the job.
pub struct JobOrchestrator {
    planner: Arc<Planner>,
    validator: Arc<crate::validator::Validator>,
    router: Arc<MessageRouter>,
    idempotency: Arc<dyn IdempotencyLog>,
    approvals: Arc<ApprovalRegistry>,
    budget_config: JobBudgetConfig,
    bridge_id: ComponentId,
    step_retry_limit: u32,
}

impl JobOrchestrator {
    pub fn new(
        planner: Arc<Planner>,
        validator: Arc<crate::validator::Validator>,
        router: Arc<MessageRouter>,
        idempotency: Arc<dyn IdempotencyLog>,
        approvals: Arc<ApprovalRegistry>,
        budget_config: JobBudgetConfig,
    ) -> Self {
        Self {
            planner,
            validator,
            router,
            idempotency,
            approvals,
            budget_config,
            bridge_id: ComponentId::parse("bridge").expect("'bridge' is a fixed component id"),
            step_retry_limit: DEFAULT_STEP_RETRY_LIMIT,
        }
    }

    /// Runs `job` to a terminal status. `system_prompt`/`user_message` feed
    /// the planner; `cancel` is the worker's cancellation signal (from the
    /// pool or an explicit job cancellation).
    pub async fn run(&self, mut job: Job, system_prompt: &str, user_message: &str, cancel: CancellationToken) -> Job {
        let job_budget = TimeoutBudget::with_system_clock(format!("job-{}", job.id), self.budget_config.job_total);
        // One handler for the whole job: revision cycles send planning back
        // through `plan_job` repeatedly, and `check_repetition` only catches
        // a planner resubmitting the plan it was just rejected for if the
        // rejection fingerprint survives across those calls.
        let mut handler = FailureHandler::new();

        job.transition(JobStatus::Planning);
        let plan = match self.plan_job(&mut job, &job_budget, system_prompt, user_message, &cancel, &mut handler).await {
            Ok(plan) => plan,
            Err(error) => return self.fail(job, error),
        };

        job.plan = Some(plan.clone());
        job.transition(JobStatus::Validating);
        let plan = match self.validate_job(&mut job, &job_budget, plan, system_prompt, user_message, &cancel, &mut handler).await {
            Ok(Some(plan)) => plan,
            Ok(None) => return job, // terminal inside validate_job (rejected / approval-denied / timed out)
            Err(error) => return self.fail(job, error),
        };

        job.transition(JobStatus::Executing);
        self.execute_job(job, plan, &job_budget, &cancel).await
    }

    fn fail(&self, mut job: Job, error: SentinelError) -> Job {
        job.error = Some(to_error_json(&error));
        job.transition(if error.kind == sentinel_types::ErrorKind::Cancelled { JobStatus::Cancelled } else { JobStatus::Failed });
        job
    }

    async fn plan_job(
        &self,
        job: &mut Job,
        job_budget: &TimeoutBudget,
        system_prompt: &str,
        user_message: &str,
        cancel: &CancellationToken,
        handler: &mut FailureHandler,
    ) -> Result<ExecutionPlan, SentinelError> {
        loop {
            if cancel.is_cancelled() {
                return Err(SentinelError::new(sentinel_types::ErrorKind::Cancelled, "job cancelled during planning"));
            }

            let timeout = job_budget.cap(self.budget_config.planning, BudgetPhase::Planning)?;
            let raw = run_with_timeout("planning", timeout, &[cancel.clone()], self.planner.propose(system_prompt, user_message)).await?;

            if let Some(failure) = classify_response(&raw) {
                handler.admit_retry(failure)?;
                handler.record_replan();
                continue;
            }

            let plan = parse_plan(&raw, job.id.as_uuid())?;
            handler.check_repetition(&plan)?;
            return Ok(plan);
        }
    }

    /// Returns `Ok(Some(plan))` once approved and ready for execution,
    /// `Ok(None)` if the job reached a terminal status inside this phase
    /// (rejected, approval denied/expired), or `Err` on a hard failure.
    async fn validate_job(
        &self,
        job: &mut Job,
        job_budget: &TimeoutBudget,
        mut plan: ExecutionPlan,
        system_prompt: &str,
        user_message: &str,
        cancel: &CancellationToken,
        handler: &mut FailureHandler,
    ) -> Result<Option<ExecutionPlan>, SentinelError> {
        loop {
            let timeout = job_budget.cap(self.budget_config.validation, BudgetPhase::Validation)?;
            let validation = run_with_timeout("validation", timeout, &[cancel.clone()], self.validator.validate(&plan)).await?;

            match validation.verdict {
                Verdict::Approved => {
                    job.validation = Some(validation);
                    return Ok(Some(plan));
                }
                Verdict::Rejected => {
                    job.validation = Some(validation);
                    job.error = Some(JsonValue::String("validation-rejected".into()));
                    job.transition(JobStatus::Failed);
                    return Ok(None);
                }
                Verdict::NeedsRevision => {
                    handler.record_rejection(&plan);
                    handler.record_revision_cycle();
                    job.transition(JobStatus::Planning);
                    plan = self.plan_job(job, job_budget, system_prompt, user_message, cancel, handler).await?;
                    job.plan = Some(plan.clone());
                    job.transition(JobStatus::Validating);
                }
                Verdict::NeedsUserApproval => {
                    job.validation = Some(validation);
                    job.transition(JobStatus::AwaitingApproval);
                    let (nonce, rx) = self.approvals.issue_nonce(job.id);
                    job.metadata.insert("approvalNonce".to_string(), JsonValue::String(nonce));
                    info!(job_id = %job.id, "awaiting human approval");

                    let remaining = job_budget.remaining();
                    let decision = tokio::select! {
                        decision = rx => decision.ok(),
                        _ = tokio::time::sleep(remaining) => None,
                        _ = cancel.cancelled() => None,
                    };

                    match decision {
                        Some(ApprovalDecision::Approved) => {
                            job.transition(JobStatus::Validating);
                            return Ok(Some(plan));
                        }
                        Some(ApprovalDecision::Rejected) => {
                            job.error = Some(JsonValue::String("approval-rejected".into()));
                            job.transition(JobStatus::Failed);
                            return Ok(None);
                        }
                        None if cancel.is_cancelled() => {
                            job.transition(JobStatus::Cancelled);
                            return Ok(None);
                        }
                        None => {
                            job.error = Some(JsonValue::String("approval-timed-out".into()));
                            job.transition(JobStatus::Failed);
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }

    async fn execute_job(&self, mut job: Job, plan: ExecutionPlan, job_budget: &TimeoutBudget, cancel: &CancellationToken) -> Job {
        let mut outcomes: BTreeMap<String, StepOutcome> = BTreeMap::new();
        let mut side_effects: Vec<String> = Vec::new();

        for group in group_by_parallel(&plan.steps) {
            if cancel.is_cancelled() {
                job.transition(JobStatus::Cancelled);
                return self.attach_side_effects(job, side_effects);
            }

            let step_timeout = match job_budget.cap(self.budget_config.per_step, BudgetPhase::Step) {
                Ok(t) => t,
                Err(error) => return self.fail_with_side_effects(job, error, side_effects),
            };

            let results = futures::future::join_all(
                group.iter().map(|step| self.run_step(&job, step, &outcomes, step_timeout, cancel.clone())),
            )
            .await;

            for (step, result) in group.iter().zip(results) {
                match result {
                    Ok(outcome) => {
                        if outcome.status == "completed" {
                            side_effects.push(step.step_id.clone());
                        }
                        outcomes.insert(step.step_id.clone(), outcome);
                    }
                    Err(error) => return self.fail_with_side_effects(job, error, side_effects),
                }
            }
        }

        job.result = Some(JsonValue::Object(
            outcomes
                .into_iter()
                .map(|(step_id, outcome)| {
                    (
                        step_id,
                        JsonValue::Object(
                            [
                                ("status".to_string(), JsonValue::String(outcome.status)),
                                ("result".to_string(), outcome.result),
                            ]
                            .into_iter()
                            .collect(),
                        ),
                    )
                })
                .collect(),
        ));
        job.transition(JobStatus::Completed);
        job
    }

    fn fail_with_side_effects(&self, mut job: Job, error: SentinelError, side_effects: Vec<String>) -> Job {
        job.error = Some(to_error_json(&error));
        job.transition(JobStatus::Failed);
        self.attach_side_effects(job, side_effects)
    }

    fn attach_side_effects(&self, mut job: Job, side_effects: Vec<String>) -> Job {
        job.metadata.insert(
            "side_effects".to_string(),
            JsonValue::Array(side_effects.into_iter().map(JsonValue::String).collect()),
        );
        job
    }

    async fn run_step(
        &self,
        job: &Job,
        step: &ExecutionStep,
        outcomes: &BTreeMap<String, StepOutcome>,
        step_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<StepOutcome, SentinelError> {
        if let Some(condition) = &step.condition {
            if !evaluate(condition, outcomes) {
                return Ok(StepOutcome { status: "skipped".to_string(), result: JsonValue::Null });
            }
        }

        let job_id = job.id.to_string();
        match self.idempotency.check(&job_id, &step.step_id).await.map_err(JournalErrExt::into_sentinel)? {
            CheckOutcome::Cached(result) => return Ok(StepOutcome { status: "completed".to_string(), result }),
            CheckOutcome::Execute => {}
        }

        let key = IdempotencyKey::new(&job_id, &step.step_id);
        let mut attempt = 0;

        loop {
            let payload = JsonValue::Object(
                [
                    ("capability".to_string(), JsonValue::String(step.capability.clone())),
                    ("action".to_string(), JsonValue::String(step.action.clone())),
                    ("stepId".to_string(), JsonValue::String(step.step_id.clone())),
                    (
                        "parameters".to_string(),
                        JsonValue::Object(step.parameters.clone().into_iter().collect()),
                    ),
                ]
                .into_iter()
                .collect(),
            );

            let to = ComponentId::parse(&format!("gear:{}", step.capability))?;
            let mut request = Message::request(self.bridge_id.clone(), to, MessageType::ExecuteRequest, payload);
            request.metadata.insert("timeoutMs".to_string(), JsonValue::Number(step_timeout.as_millis() as f64));
            request.job_id = Some(job.id.as_uuid());

            let response = self.router.dispatch(request, cancel.clone()).await;

            if response.message_type == MessageType::Error {
                self.idempotency.record_failure(&key).await.map_err(JournalErrExt::into_sentinel)?;
                attempt += 1;
                if attempt > self.step_retry_limit {
                    let error: SentinelError = serde_json::from_value(response.payload.into())
                        .unwrap_or_else(|_| SentinelError::new(sentinel_types::ErrorKind::Internal, "step failed"));
                    return Err(error);
                }
                self.idempotency.check(&job_id, &step.step_id).await.map_err(JournalErrExt::into_sentinel)?;
                continue;
            }

            let result = response
                .payload
                .as_object()
                .and_then(|obj| obj.get("result"))
                .cloned()
                .unwrap_or(JsonValue::Null);
            self.idempotency.record_completion(&key, result.clone()).await.map_err(JournalErrExt::into_sentinel)?;
            return Ok(StepOutcome { status: "completed".to_string(), result });
        }
    }
}

trait JournalErrExt {
    fn into_sentinel(self) -> SentinelError;
}

impl JournalErrExt for sentinel_journal::JournalError {
    fn into_sentinel(self) -> SentinelError {
        self.into_sentinel_error()
    }
}

/// Groups plan steps into sequential batches: a step with no
/// `parallel_group` is its own batch; consecutive steps sharing the same
/// group tag batch together and run concurrently. The planner is trusted
/// to have already placed dependent steps in a group only after their
/// dependencies (DESIGN.md: adjacency-based grouping, not a full DAG
/// scheduler).
fn group_by_parallel(steps: &[ExecutionStep]) -> Vec<Vec<&ExecutionStep>> {
    let mut groups: Vec<Vec<&ExecutionStep>> = Vec::new();
    for step in steps {
        match (&step.parallel_group, groups.last_mut()) {
            (Some(tag), Some(last)) if last.first().and_then(|s| s.parallel_group.as_ref()) == Some(tag) => {
                last.push(step);
            }
            _ => groups.push(vec![step]),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;
    use sentinel_types::RiskLevel;

    fn step(id: &str, group: Option<&str>) -> ExecutionStep {
        ExecutionStep {
            step_id: id.to_string(),
            capability: "fs".to_string(),
            action: "read".to_string(),
            parameters: Map::new(),
            risk_level: RiskLevel::Low,
            description: String::new(),
            order: 0,
            dependencies: vec![],
            parallel_group: group.map(str::to_string),
            rollback_step: None,
            condition: None,
            metadata: Map::new(),
        }
    }

    #[test]
    fn ungrouped_steps_each_form_their_own_batch() {
        let steps = vec![step("a", None), step("b", None)];
        let groups = group_by_parallel(&steps);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn adjacent_same_group_steps_batch_together() {
        let steps = vec![step("a", Some("g1")), step("b", Some("g1")), step("c", None)];
        let groups = group_by_parallel(&steps);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 1);
    }

    #[test]
    fn non_adjacent_same_group_tag_does_not_merge() {
        let steps = vec![step("a", Some("g1")), step("b", None), step("c", Some("g1"))];
        let groups = group_by_parallel(&steps);
        assert_eq!(groups.len(), 3);
    }
}
