use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::json::JsonValue;

/// Deterministic key for an execution-log slot.
///
/// sha-256 over the length-prefixed `(job-id, step-id)` pair, mirroring the
/// teacher's promise-root hashing: length-prefixing each part keeps
/// `("ab", "c")` and `("a", "bc")` from colliding. Stable across retries and
/// crash-restarts so a replayed step lands on the same slot.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey([u8; 32]);

impl IdempotencyKey {
    pub fn new(job_id: &str, step_id: &str) -> Self {
        let mut hasher = Sha256::new();
        for part in [job_id, step_id] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Lifecycle state of an execution-log entry.
///
/// Transitions: `started -> completed`, `started -> failed`,
/// `{completed, failed, started} -> started` (reset on replay). There is no
/// terminal ceiling on `failed` — retrying is always legal; the caller's
/// attempt counter is what bounds it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionLogStatus {
    Started,
    Completed,
    Failed,
}

/// One slot in the idempotent execution log.
///
/// At most one entry exists per key. `result` is populated only once the
/// entry reaches `Completed`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub key: IdempotencyKey,
    pub status: ExecutionLogStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<JsonValue>,
}

impl ExecutionLogEntry {
    pub fn started(key: IdempotencyKey, at: DateTime<Utc>) -> Self {
        Self {
            key,
            status: ExecutionLogStatus::Started,
            started_at: at,
            completed_at: None,
            result: None,
        }
    }

    pub fn reset(&mut self, at: DateTime<Utc>) {
        self.status = ExecutionLogStatus::Started;
        self.started_at = at;
        self.completed_at = None;
        self.result = None;
    }

    pub fn complete(&mut self, result: JsonValue, at: DateTime<Utc>) {
        self.status = ExecutionLogStatus::Completed;
        self.completed_at = Some(at);
        self.result = Some(result);
    }

    pub fn fail(&mut self) {
        self.status = ExecutionLogStatus::Failed;
        self.completed_at = None;
        self.result = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_for_same_inputs() {
        assert_eq!(
            IdempotencyKey::new("job-1", "step-1"),
            IdempotencyKey::new("job-1", "step-1")
        );
    }

    #[test]
    fn key_distinguishes_length_prefix_boundary() {
        assert_ne!(
            IdempotencyKey::new("ab", "c"),
            IdempotencyKey::new("a", "bc")
        );
    }

    #[test]
    fn reset_clears_result_and_completed_at() {
        let now = Utc::now();
        let mut entry = ExecutionLogEntry::started(IdempotencyKey::new("j", "s"), now);
        entry.complete(JsonValue::Bool(true), now);
        assert_eq!(entry.status, ExecutionLogStatus::Completed);

        entry.reset(now);
        assert_eq!(entry.status, ExecutionLogStatus::Started);
        assert!(entry.completed_at.is_none());
        assert!(entry.result.is_none());
    }

    #[test]
    fn fail_clears_any_prior_result() {
        let now = Utc::now();
        let mut entry = ExecutionLogEntry::started(IdempotencyKey::new("j", "s"), now);
        entry.complete(JsonValue::Bool(true), now);
        entry.fail();
        assert_eq!(entry.status, ExecutionLogStatus::Failed);
        assert!(entry.result.is_none());
    }
}
