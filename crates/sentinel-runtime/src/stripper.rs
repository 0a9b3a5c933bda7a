use sentinel_types::{ExecutionPlan, StrippedPlan, StrippedStep};

/// Removes every non-essential field from a plan before the validator ever
/// sees it.
///
/// Security-critical: this is the entire information barrier on the plan
/// side. No reasoning, description, cost estimate, metadata, ordering, or
/// rollback reference crosses this boundary — adding a field to
/// `ExecutionStep` must not silently leak it here, which is why this
/// function lists the essential fields explicitly rather than using
/// struct-update syntax against `ExecutionStep`.
pub fn strip(plan: &ExecutionPlan) -> StrippedPlan {
    StrippedPlan {
        plan_id: plan.plan_id,
        job_id: plan.job_id,
        steps: plan
            .steps
            .iter()
            .map(|step| StrippedStep {
                step_id: step.step_id.clone(),
                capability: step.capability.clone(),
                action: step.action.clone(),
                parameters: step.parameters.clone(),
                risk_level: step.risk_level,
            })
            .collect(),
    }
}
