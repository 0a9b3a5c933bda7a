pub mod audit;
pub mod component;
pub mod error;
pub mod idempotency;
pub mod job;
pub mod json;
pub mod llm;
pub mod message;
pub mod plan;
pub mod validation;

pub use audit::{AuditEntry, AuditSink};
pub use component::ComponentId;
pub use error::{ErrorKind, SentinelError};
pub use idempotency::{ExecutionLogEntry, ExecutionLogStatus, IdempotencyKey};
pub use job::{Job, JobId, JobSource, JobStatus};
pub use json::JsonValue;
pub use llm::{ChatChunk, ChatMessage, ChatRequest, LlmAdapter, Role, Usage};
pub use message::{Message, MessageType, MAX_MESSAGE_BYTES, WARN_MESSAGE_BYTES};
pub use plan::{ConditionOperator, ExecutionPlan, ExecutionStep, RiskLevel, StepCondition, StrippedPlan, StrippedStep};
pub use validation::{Category, StepVerdict, ValidationResult, Verdict};
