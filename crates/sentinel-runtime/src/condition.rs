use std::collections::BTreeMap;

use sentinel_types::{ConditionOperator, JsonValue, StepCondition};

/// Per-step outcome the conditional-predicate evaluator sees: enough to
/// resolve `step:<id>.status` and `step:<id>.result.*` dot-paths.
#[derive(Clone, Debug)]
pub struct StepOutcome {
    pub status: String,
    pub result: JsonValue,
}

/// Builds the synthetic root the dot-path evaluator resolves against:
/// one key per step, `step:<id>`, each an object with `status` and `result`.
fn build_root(outcomes: &BTreeMap<String, StepOutcome>) -> JsonValue {
    let entries = outcomes
        .iter()
        .map(|(step_id, outcome)| {
            let value = JsonValue::Object(
                [
                    ("status".to_string(), JsonValue::String(outcome.status.clone())),
                    ("result".to_string(), outcome.result.clone()),
                ]
                .into_iter()
                .collect(),
            );
            (format!("step:{step_id}"), value)
        })
        .collect();
    JsonValue::Object(entries)
}

/// Evaluates a step's `condition` against already-completed step outcomes.
///
/// Fail-closed: a missing path makes every comparison
/// operator return false (skip the step), and `eq`/`neq` coerce only when
/// both sides parse as finite numbers — otherwise they fall back to strict
/// equality (open question resolved in DESIGN.md: booleans compare strictly).
pub fn evaluate(condition: &StepCondition, outcomes: &BTreeMap<String, StepOutcome>) -> bool {
    let root = build_root(outcomes);
    let resolved = root.get_path(&condition.field);

    match condition.operator {
        ConditionOperator::Exists => resolved.is_some_and(|v| !matches!(v, JsonValue::Null)),
        ConditionOperator::Eq => resolved.is_some_and(|v| values_eq(v, &condition.value)),
        ConditionOperator::Neq => resolved.is_some_and(|v| !values_eq(v, &condition.value)),
        ConditionOperator::Gt => match (resolved.and_then(JsonValue::as_f64), condition.value.as_f64()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        ConditionOperator::Lt => match (resolved.and_then(JsonValue::as_f64), condition.value.as_f64()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        ConditionOperator::Contains => match resolved {
            Some(JsonValue::Array(items)) => items.contains(&condition.value),
            Some(JsonValue::String(s)) => condition.value.as_str().is_some_and(|needle| s.contains(needle)),
            _ => false,
        },
    }
}

fn values_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcomes(pairs: &[(&str, &str, JsonValue)]) -> BTreeMap<String, StepOutcome> {
        pairs
            .iter()
            .map(|(id, status, result)| (id.to_string(), StepOutcome { status: status.to_string(), result: result.clone() }))
            .collect()
    }

    fn cond(field: &str, operator: ConditionOperator, value: JsonValue) -> StepCondition {
        StepCondition { field: field.to_string(), operator, value }
    }

    #[test]
    fn eq_coerces_numeric_strings_across_number_types() {
        let outcomes = outcomes(&[("s1", "completed", JsonValue::Object([("count".to_string(), JsonValue::Number(3.0))].into_iter().collect()))]);
        let condition = cond("step:s1.result.count", ConditionOperator::Eq, JsonValue::Number(3.0));
        assert!(evaluate(&condition, &outcomes));
    }

    #[test]
    fn eq_on_booleans_is_strict_not_coerced() {
        let outcomes = outcomes(&[("s1", "completed", JsonValue::Object([("ok".to_string(), JsonValue::Bool(true))].into_iter().collect()))]);
        let condition = cond("step:s1.result.ok", ConditionOperator::Eq, JsonValue::String("true".into()));
        assert!(!evaluate(&condition, &outcomes));
    }

    #[test]
    fn missing_path_fails_closed_for_every_operator() {
        let outcomes = outcomes(&[]);
        for operator in [
            ConditionOperator::Eq,
            ConditionOperator::Neq,
            ConditionOperator::Gt,
            ConditionOperator::Lt,
            ConditionOperator::Contains,
            ConditionOperator::Exists,
        ] {
            let condition = cond("step:missing.status", operator, JsonValue::String("completed".into()));
            assert!(!evaluate(&condition, &outcomes), "{operator:?} should fail closed");
        }
    }

    #[test]
    fn exists_is_true_only_for_a_resolved_non_null_value() {
        let outcomes = outcomes(&[("s1", "completed", JsonValue::Null)]);
        let condition = cond("step:s1.status", ConditionOperator::Exists, JsonValue::Null);
        assert!(evaluate(&condition, &outcomes));

        let condition = cond("step:s1.result", ConditionOperator::Exists, JsonValue::Null);
        assert!(!evaluate(&condition, &outcomes));
    }

    #[test]
    fn contains_checks_array_membership_and_substring() {
        let outcomes = outcomes(&[(
            "s1",
            "completed",
            JsonValue::Object([("tags".to_string(), JsonValue::Array(vec![JsonValue::String("a".into())]))].into_iter().collect()),
        )]);
        let condition = cond("step:s1.result.tags", ConditionOperator::Contains, JsonValue::String("a".into()));
        assert!(evaluate(&condition, &outcomes));
    }
}
