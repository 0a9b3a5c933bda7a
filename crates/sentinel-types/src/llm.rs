use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::SentinelError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Request sent to an LLM adapter. Implementations are external;
/// this crate only defines the contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stop_sequences: Vec<String>,
    pub tools: Option<serde_json::Value>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.1,
            max_tokens: 4096,
            stop_sequences: Vec::new(),
            tools: None,
        }
    }
}

/// Token accounting on the final chunk of a stream.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cached_tokens: u32,
}

/// One increment of a streamed chat response. `usage` is populated only on
/// the chunk where `done` is true.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatChunk {
    pub content: String,
    pub tool_calls: Option<serde_json::Value>,
    pub done: bool,
    pub usage: Option<Usage>,
}

/// Default first-token timeout, enforced by the adapter implementation, not
/// this trait.
pub const DEFAULT_FIRST_TOKEN_TIMEOUT_MS: u64 = 30_000;

/// Default stall timeout between chunks.
pub const DEFAULT_STALL_TIMEOUT_MS: u64 = 30_000;

/// Seam consumed by `sentinel-runtime::planner` and `::validator`. Concrete
/// provider adapters live outside the core.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<BoxStream<'static, Result<ChatChunk, SentinelError>>, SentinelError>;
}
