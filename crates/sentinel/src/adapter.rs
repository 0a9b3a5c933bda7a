use async_trait::async_trait;
use futures::stream::BoxStream;
use sentinel_types::{ChatChunk, ChatRequest, LlmAdapter, SentinelError};

/// Placeholder `LlmAdapter` wired in until a real provider is configured.
/// Concrete provider adapters (HTTP clients against a model API) are
/// external to this crate; this stub lets `sentinel serve` start up
/// end-to-end and fail a job's planning step with a clear, attributable
/// error rather than refusing to build or run at all.
pub struct UnconfiguredLlmAdapter {
    role: &'static str,
}

impl UnconfiguredLlmAdapter {
    pub fn planner() -> Self {
        Self { role: "planner" }
    }

    pub fn validator() -> Self {
        Self { role: "validator" }
    }
}

#[async_trait]
impl LlmAdapter for UnconfiguredLlmAdapter {
    async fn chat(&self, _request: ChatRequest) -> Result<BoxStream<'static, Result<ChatChunk, SentinelError>>, SentinelError> {
        Err(SentinelError::provider(format!(
            "no {} LLM adapter configured; wire a concrete provider before serving jobs",
            self.role
        )))
    }
}
