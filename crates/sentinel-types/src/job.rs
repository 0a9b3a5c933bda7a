use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::json::JsonValue;
use crate::plan::ExecutionPlan;
use crate::validation::ValidationResult;

/// Opaque job identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a job originated. Drives default priority and retry posture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    User,
    Scheduler,
    SubJob,
}

/// Per-job state machine.
///
/// `pending -> planning -> validating -> awaiting_approval? -> executing ->
/// completed | failed | cancelled`. Transitions occur only in the owning
/// worker (see `sentinel-runtime::orchestrator`); the queue only moves jobs
/// between `pending` and `claimed` on the caller's behalf.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Claimed,
    Planning,
    Validating,
    AwaitingApproval,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn status_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Planning => "planning",
            Self::Validating => "validating",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status_str())
    }
}

/// The unit of work moving through the queue, worker pool, and orchestrator.
///
/// Mutated only by the owning worker (status, attempts, plan, validation,
/// result/error) or by the queue's claim/release operations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source: JobSource,
    pub priority: i32,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub plan: Option<ExecutionPlan>,
    pub validation: Option<ValidationResult>,
    pub metadata: BTreeMap<String, JsonValue>,
    pub result: Option<JsonValue>,
    pub error: Option<JsonValue>,
}

impl Job {
    pub fn new(source: JobSource, priority: i32, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            source,
            priority,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            created_at: now,
            updated_at: now,
            completed_at: None,
            plan: None,
            validation: None,
            metadata: BTreeMap::new(),
            result: None,
            error: None,
        }
    }

    pub fn transition(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
        if status.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
    }

    pub fn retries_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_pending_with_zero_attempts() {
        let job = Job::new(JobSource::User, 0, 3);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn transition_to_terminal_status_sets_completed_at() {
        let mut job = Job::new(JobSource::User, 0, 3);
        job.transition(JobStatus::Completed);
        assert!(job.completed_at.is_some());
        assert!(job.status.is_terminal());
    }

    #[test]
    fn transition_to_nonterminal_status_leaves_completed_at_unset() {
        let mut job = Job::new(JobSource::User, 0, 3);
        job.transition(JobStatus::Planning);
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn retries_exhausted_compares_attempts_to_max() {
        let mut job = Job::new(JobSource::User, 0, 2);
        job.attempts = 2;
        assert!(job.retries_exhausted());
        job.attempts = 1;
        assert!(!job.retries_exhausted());
    }
}
