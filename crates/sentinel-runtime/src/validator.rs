use std::sync::Arc;

use futures::StreamExt;
use sentinel_types::{ChatMessage, ChatRequest, ExecutionPlan, LlmAdapter, SentinelError, ValidationResult};
use tracing::warn;

use crate::json_extract::{excerpt, extract_json_object};
use crate::stripper::strip;

const VALIDATOR_SYSTEM_PROMPT_VERSION: &str = "v1";

/// Fixed, versioned, immutable system prompt for the validator model.
///
/// States the validator's role and categories, explicitly asserts the
/// information barrier (the validator sees only the plan — never the user
/// message, conversation history, memories, or capability catalogue), lists
/// the hard-floor policies that always require human approval, and specifies
/// the JSON response schema. Changing this string is a versioned change:
/// bump `VALIDATOR_SYSTEM_PROMPT_VERSION` alongside it.
fn validator_system_prompt() -> String {
    format!(
        "You are the independent plan validator ({VALIDATOR_SYSTEM_PROMPT_VERSION}).\n\n\
        Your entire input is the plan below. You do not see the user's original \
        message, conversation history, memories, or the capability catalogue. \
        Judge the plan purely on what it says it will do.\n\n\
        Classify each step under one category: security, privacy, financial, \
        policy, composite, ethical, legal.\n\n\
        The following always require human approval regardless of your risk \
        assessment: file deletion, shell execution, financial transactions, \
        system configuration changes.\n\n\
        Respond with JSON only, matching exactly:\n\
        {{\"verdict\": \"approved\"|\"rejected\"|\"needs_user_approval\"|\"needs_revision\", \
        \"overall_risk\": \"low\"|\"medium\"|\"high\"|\"critical\", \
        \"reasoning\": string, \
        \"step_verdicts\": [{{\"step_id\": string, \"category\": string, \"reasoning\": string}}], \
        \"suggested_revisions\": string|null}}"
    )
}

pub struct Validator {
    adapter: Arc<dyn LlmAdapter>,
    model: String,
    planner_model: String,
    temperature: f32,
    max_tokens: u32,
}

impl Validator {
    pub fn new(adapter: Arc<dyn LlmAdapter>, model: impl Into<String>, planner_model: impl Into<String>) -> Self {
        Self {
            adapter,
            model: model.into(),
            planner_model: planner_model.into(),
            temperature: 0.1,
            max_tokens: 4096,
        }
    }

    pub async fn validate(&self, plan: &ExecutionPlan) -> Result<ValidationResult, SentinelError> {
        if self.model == self.planner_model {
            warn!(model = %self.model, "planner and validator share the same model identity");
        }

        let stripped = strip(plan);
        let stripped_json = serde_json::to_string(&stripped)
            .map_err(|e| SentinelError::provider(format!("failed to serialize stripped plan: {e}")))?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(validator_system_prompt()),
                ChatMessage::user(stripped_json),
            ],
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

        parse_verdict(&collected)
    }
}

/// Strip code fences, fall back to the first `{` through the last `}`, then
/// parse. Any failure is a *provider* error carrying the offending excerpt.
fn parse_verdict(raw: &str) -> Result<ValidationResult, SentinelError> {
    let candidate = extract_json_object(raw).ok_or_else(|| {
        SentinelError::provider(format!("validator response had no JSON object: {}", excerpt(raw)))
    })?;

    serde_json::from_str::<ValidationResult>(candidate)
        .map_err(|e| SentinelError::provider(format!("validator response failed schema validation ({e}): {}", excerpt(candidate))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_verdict_extracts_from_fenced_code_block() {
        let raw = "```json\n{\"verdict\": \"approved\", \"overall_risk\": \"low\", \"reasoning\": \"ok\", \"step_verdicts\": [], \"suggested_revisions\": null}\n```";
        assert_eq!(parse_verdict(raw).unwrap().verdict, sentinel_types::Verdict::Approved);
    }

    #[test]
    fn parse_verdict_fails_with_provider_error_on_malformed_json() {
        let err = parse_verdict("not json at all").unwrap_err();
        assert_eq!(err.kind, sentinel_types::ErrorKind::Provider);
    }

    #[test]
    fn parse_verdict_accepts_well_formed_response() {
        let raw = r#"{"verdict": "approved", "overall_risk": "low", "reasoning": "fine", "step_verdicts": [], "suggested_revisions": null}"#;
        let result = parse_verdict(raw).unwrap();
        assert_eq!(result.verdict, sentinel_types::Verdict::Approved);
    }
}
