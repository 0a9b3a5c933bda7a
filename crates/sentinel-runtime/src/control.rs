use async_trait::async_trait;
use sentinel_types::{Job, JobId, JsonValue, SentinelError, ValidationResult};
use tokio_stream::wrappers::BroadcastStream;

/// Status/progress events the subscription interface's WebSocket stream
/// emits. Mirrors the gateway's documented wire shapes exactly so a
/// gateway can serialize these without translation.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    Status { job_id: JobId, status: String, step: Option<String> },
    Progress { job_id: JobId, percent: u8, step: Option<String> },
}

/// The seam an external HTTP/WebSocket gateway (out of core scope) drives.
/// No HTTP framework is pulled into this crate — this trait *is* the
/// documented boundary; a gateway binary implements transport on top of it.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn submit_job(&self, spec: JsonValue) -> Result<Job, SentinelError>;
    async fn get_job(&self, job_id: JobId) -> Result<Job, SentinelError>;
    async fn cancel_job(&self, job_id: JobId) -> Result<(), SentinelError>;
    async fn issue_approval_nonce(&self, job_id: JobId) -> Result<String, SentinelError>;
    async fn approve_job(&self, job_id: JobId, nonce: &str) -> Result<(), SentinelError>;
    async fn reject_job(&self, job_id: JobId, nonce: &str) -> Result<(), SentinelError>;
    async fn explain_job(&self, job_id: JobId) -> Result<ValidationResult, SentinelError>;
    async fn replay_job(&self, job_id: JobId) -> Result<Job, SentinelError>;
    fn subscribe(&self) -> BroadcastStream<StatusEvent>;
}
