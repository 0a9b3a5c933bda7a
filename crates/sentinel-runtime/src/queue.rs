use sentinel_types::{Job, JobId, JobStatus, SentinelError};
use sqlx::{Pool, Row, Sqlite};

/// Durable, priority-ordered queue with atomic claim.
///
/// Backed by the same SQLite pool as the execution log. `claim` uses
/// `UPDATE ... WHERE status = 'pending' ... RETURNING` so two concurrent
/// pollers racing the same row never both win it — SQLite serializes
/// writers, and the `WHERE` clause makes the second writer's update affect
/// zero rows.
pub struct JobQueue {
    pool: Pool<Sqlite>,
}

impl JobQueue {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn enqueue(&self, job: &Job) -> Result<(), SentinelError> {
        sqlx::query(
            "INSERT INTO jobs (id, source, priority, status, attempts, max_attempts, created_at, updated_at, completed_at, plan_json, validation_json, metadata_json, result_json, error_json)
             VALUES (?, ?, ?, 'pending', 0, ?, ?, ?, NULL, NULL, NULL, '{}', NULL, NULL)",
        )
        .bind(job.id.to_string())
        .bind(serde_json::to_string(&job.source).map_err(db_err)?)
        .bind(job.priority)
        .bind(job.max_attempts)
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Picks the highest-priority pending job (ties broken by created-at),
    /// transitions it to `claimed`, and returns it. Returns `None` when the
    /// queue is empty — the caller (worker poll loop) backs off on a miss.
    pub async fn claim(&self, _worker_id: &str) -> Result<Option<Job>, SentinelError> {
        let row = sqlx::query(
            "UPDATE jobs SET status = 'claimed', updated_at = ?
             WHERE id = (
                 SELECT id FROM jobs WHERE status = 'pending'
                 ORDER BY priority DESC, created_at ASC LIMIT 1
             )
             RETURNING id, source, priority, status, attempts, max_attempts,
                       created_at, updated_at, completed_at, plan_json,
                       validation_json, metadata_json, result_json, error_json",
        )
        .bind(chrono::Utc::now().to_rfc3339())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(row_to_job).transpose()
    }

    /// Transitions a claimed job to a terminal status, or back to pending
    /// with an incremented attempt count on retriable failure. Enforces
    /// `max_attempts`: a retriable failure past the limit still becomes
    /// `failed`.
    pub async fn release(&self, job_id: JobId, status: JobStatus, retriable: bool) -> Result<(), SentinelError> {
        let now = chrono::Utc::now().to_rfc3339();

        if !status.is_terminal() {
            return Err(SentinelError::validation("release requires a terminal status or a retry decision"));
        }

        if retriable && status == JobStatus::Failed {
            let row = sqlx::query("SELECT attempts, max_attempts FROM jobs WHERE id = ?")
                .bind(job_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .ok_or_else(|| SentinelError::not_found(format!("job {job_id} not found")))?;
            let attempts: i64 = row.try_get("attempts").map_err(db_err)?;
            let max_attempts: i64 = row.try_get("max_attempts").map_err(db_err)?;

            if attempts + 1 < max_attempts {
                sqlx::query("UPDATE jobs SET status = 'pending', attempts = attempts + 1, updated_at = ? WHERE id = ?")
                    .bind(&now)
                    .bind(job_id.to_string())
                    .execute(&self.pool)
                    .await
                    .map_err(db_err)?;
                return Ok(());
            }
        }

        sqlx::query("UPDATE jobs SET status = ?, updated_at = ?, completed_at = ? WHERE id = ?")
            .bind(status.status_str())
            .bind(&now)
            .bind(&now)
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Persists a finished job's full state — status, plan, validation,
    /// result, error, metadata — in one statement. `release` only ever
    /// recorded the status transition; this is what the worker loop calls
    /// once the orchestrator hands back a terminal job.
    pub async fn complete(&self, job: &Job, retriable: bool) -> Result<(), SentinelError> {
        if !job.status.is_terminal() {
            return Err(SentinelError::validation("complete requires a terminal job status"));
        }
        let now = chrono::Utc::now().to_rfc3339();

        if retriable && job.status == JobStatus::Failed {
            let row = sqlx::query("SELECT attempts, max_attempts FROM jobs WHERE id = ?")
                .bind(job.id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .ok_or_else(|| SentinelError::not_found(format!("job {} not found", job.id)))?;
            let attempts: i64 = row.try_get("attempts").map_err(db_err)?;
            let max_attempts: i64 = row.try_get("max_attempts").map_err(db_err)?;

            if attempts + 1 < max_attempts {
                sqlx::query(
                    "UPDATE jobs SET status = 'pending', attempts = attempts + 1, updated_at = ?, error_json = ? WHERE id = ?",
                )
                .bind(&now)
                .bind(to_json(&job.error)?)
                .bind(job.id.to_string())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
                return Ok(());
            }
        }

        sqlx::query(
            "UPDATE jobs SET status = ?, updated_at = ?, completed_at = ?, plan_json = ?, validation_json = ?, metadata_json = ?, result_json = ?, error_json = ? WHERE id = ?",
        )
        .bind(job.status.status_str())
        .bind(&now)
        .bind(&now)
        .bind(job.plan.as_ref().map(serde_json::to_string).transpose().map_err(json_err)?)
        .bind(job.validation.as_ref().map(serde_json::to_string).transpose().map_err(json_err)?)
        .bind(serde_json::to_string(&job.metadata).map_err(json_err)?)
        .bind(to_json(&job.result)?)
        .bind(to_json(&job.error)?)
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Introspection: every job, optionally narrowed to one status, newest
    /// first. Used by the health surface's queue-depth reporting and by a
    /// gateway's job-listing endpoint.
    pub async fn list(&self, status_filter: Option<JobStatus>) -> Result<Vec<Job>, SentinelError> {
        let rows = match status_filter {
            Some(status) => {
                sqlx::query(
                    "SELECT id, source, priority, status, attempts, max_attempts,
                            created_at, updated_at, completed_at, plan_json,
                            validation_json, metadata_json, result_json, error_json
                     FROM jobs WHERE status = ? ORDER BY created_at DESC",
                )
                .bind(status.status_str())
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?
            }
            None => {
                sqlx::query(
                    "SELECT id, source, priority, status, attempts, max_attempts,
                            created_at, updated_at, completed_at, plan_json,
                            validation_json, metadata_json, result_json, error_json
                     FROM jobs ORDER BY created_at DESC",
                )
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?
            }
        };

        rows.into_iter().map(row_to_job).collect()
    }

    /// Count of jobs currently in `status` — the "queue depth" the health
    /// surface and §8 backpressure scenario both reason about.
    pub async fn count_by_status(&self, status: JobStatus) -> Result<i64, SentinelError> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM jobs WHERE status = ?")
            .bind(status.status_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        row.try_get("n").map_err(db_err)
    }

    pub async fn get(&self, job_id: JobId) -> Result<Option<Job>, SentinelError> {
        let row = sqlx::query(
            "SELECT id, source, priority, status, attempts, max_attempts,
                    created_at, updated_at, completed_at, plan_json,
                    validation_json, metadata_json, result_json, error_json
             FROM jobs WHERE id = ?",
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(row_to_job).transpose()
    }

    pub async fn cancel(&self, job_id: JobId) -> Result<(), SentinelError> {
        let now = chrono::Utc::now().to_rfc3339();
        let affected = sqlx::query(
            "UPDATE jobs SET status = 'cancelled', updated_at = ?, completed_at = ? WHERE id = ? AND status NOT IN ('completed', 'failed', 'cancelled')",
        )
        .bind(&now)
        .bind(&now)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();

        if affected == 0 {
            return Err(SentinelError::not_found(format!("job {job_id} not found or already terminal")));
        }
        Ok(())
    }
}

fn db_err(err: sqlx::Error) -> SentinelError {
    SentinelError::new(sentinel_types::ErrorKind::Internal, err.to_string())
}

fn json_err(err: serde_json::Error) -> SentinelError {
    SentinelError::new(sentinel_types::ErrorKind::Internal, err.to_string())
}

fn to_json(value: &Option<sentinel_types::JsonValue>) -> Result<Option<String>, SentinelError> {
    value
        .clone()
        .map(|v| serde_json::to_string(&serde_json::Value::from(v)))
        .transpose()
        .map_err(json_err)
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> Result<Job, SentinelError> {
    let status_str: String = row.try_get("status").map_err(db_err)?;
    let status = parse_status(&status_str)?;
    let source_str: String = row.try_get("source").map_err(db_err)?;
    let source = serde_json::from_str(&source_str).map_err(|e| SentinelError::new(sentinel_types::ErrorKind::Internal, e.to_string()))?;

    let created_at: String = row.try_get("created_at").map_err(db_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(db_err)?;
    let completed_at: Option<String> = row.try_get("completed_at").map_err(db_err)?;
    let metadata_json: String = row.try_get("metadata_json").map_err(db_err)?;
    let plan_json: Option<String> = row.try_get("plan_json").map_err(db_err)?;
    let validation_json: Option<String> = row.try_get("validation_json").map_err(db_err)?;
    let result_json: Option<String> = row.try_get("result_json").map_err(db_err)?;
    let error_json: Option<String> = row.try_get("error_json").map_err(db_err)?;

    Ok(Job {
        id: row.try_get::<String, _>("id").map_err(db_err)?.parse().map_err(|_| SentinelError::new(sentinel_types::ErrorKind::Internal, "malformed job id"))?,
        source,
        priority: row.try_get("priority").map_err(db_err)?,
        status,
        attempts: row.try_get::<i64, _>("attempts").map_err(db_err)? as u32,
        max_attempts: row.try_get::<i64, _>("max_attempts").map_err(db_err)? as u32,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        completed_at: completed_at.map(|s| parse_timestamp(&s)).transpose()?,
        plan: plan_json.map(|s| serde_json::from_str(&s)).transpose().map_err(json_err)?,
        validation: validation_json.map(|s| serde_json::from_str(&s)).transpose().map_err(json_err)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        result: result_json.map(|s| serde_json::from_str::<serde_json::Value>(&s)).transpose().map_err(json_err)?.map(sentinel_types::JsonValue::from),
        error: error_json.map(|s| serde_json::from_str::<serde_json::Value>(&s)).transpose().map_err(json_err)?.map(sentinel_types::JsonValue::from),
    })
}

fn parse_status(s: &str) -> Result<JobStatus, SentinelError> {
    match s {
        "pending" => Ok(JobStatus::Pending),
        "claimed" => Ok(JobStatus::Claimed),
        "planning" => Ok(JobStatus::Planning),
        "validating" => Ok(JobStatus::Validating),
        "awaiting_approval" => Ok(JobStatus::AwaitingApproval),
        "executing" => Ok(JobStatus::Executing),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        "cancelled" => Ok(JobStatus::Cancelled),
        other => Err(SentinelError::new(sentinel_types::ErrorKind::Internal, format!("unknown job status '{other}'"))),
    }
}

fn parse_timestamp(s: &str) -> Result<chrono::DateTime<chrono::Utc>, SentinelError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| SentinelError::new(sentinel_types::ErrorKind::Internal, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_types::JobSource;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("../sentinel-journal/migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn claim_returns_highest_priority_pending_job() {
        let queue = JobQueue::new(pool().await);
        let low = Job::new(JobSource::User, 1, 3);
        let high = Job::new(JobSource::User, 10, 3);
        queue.enqueue(&low).await.unwrap();
        queue.enqueue(&high).await.unwrap();

        let claimed = queue.claim("worker-1").await.unwrap().unwrap();
        assert_eq!(claimed.id, high.id);
        assert_eq!(claimed.status, JobStatus::Claimed);
    }

    #[tokio::test]
    async fn claim_never_returns_same_job_twice() {
        let queue = JobQueue::new(pool().await);
        let job = Job::new(JobSource::User, 0, 3);
        queue.enqueue(&job).await.unwrap();

        let first = queue.claim("worker-1").await.unwrap();
        let second = queue.claim("worker-2").await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn release_on_retriable_failure_returns_to_pending_with_incremented_attempts() {
        let queue = JobQueue::new(pool().await);
        let job = Job::new(JobSource::User, 0, 3);
        queue.enqueue(&job).await.unwrap();
        queue.claim("worker-1").await.unwrap();

        queue.release(job.id, JobStatus::Failed, true).await.unwrap();

        let reloaded = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Pending);
        assert_eq!(reloaded.attempts, 1);
    }

    #[tokio::test]
    async fn release_past_max_attempts_is_terminal_even_if_retriable() {
        let queue = JobQueue::new(pool().await);
        let job = Job::new(JobSource::User, 0, 1);
        queue.enqueue(&job).await.unwrap();
        queue.claim("worker-1").await.unwrap();

        queue.release(job.id, JobStatus::Failed, true).await.unwrap();

        let reloaded = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn complete_persists_result_and_is_readable_back() {
        let queue = JobQueue::new(pool().await);
        let mut job = Job::new(JobSource::User, 0, 3);
        queue.enqueue(&job).await.unwrap();
        queue.claim("worker-1").await.unwrap();

        job.result = Some(sentinel_types::JsonValue::String("ok".into()));
        job.transition(JobStatus::Completed);
        queue.complete(&job, false).await.unwrap();

        let reloaded = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Completed);
        assert_eq!(reloaded.result, Some(sentinel_types::JsonValue::String("ok".into())));
    }

    #[tokio::test]
    async fn complete_on_retriable_failure_returns_to_pending_and_increments_attempts() {
        let queue = JobQueue::new(pool().await);
        let mut job = Job::new(JobSource::User, 0, 3);
        queue.enqueue(&job).await.unwrap();
        queue.claim("worker-1").await.unwrap();

        job.error = Some(sentinel_types::JsonValue::String("timed out".into()));
        job.transition(JobStatus::Failed);
        queue.complete(&job, true).await.unwrap();

        let reloaded = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Pending);
        assert_eq!(reloaded.attempts, 1);
    }

    #[tokio::test]
    async fn list_with_no_filter_returns_every_job() {
        let queue = JobQueue::new(pool().await);
        queue.enqueue(&Job::new(JobSource::User, 0, 3)).await.unwrap();
        queue.enqueue(&Job::new(JobSource::User, 1, 3)).await.unwrap();

        let all = queue.list(None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn list_filtered_by_status_excludes_other_statuses() {
        let queue = JobQueue::new(pool().await);
        let pending = Job::new(JobSource::User, 0, 3);
        let claimed = Job::new(JobSource::User, 0, 3);
        queue.enqueue(&pending).await.unwrap();
        queue.enqueue(&claimed).await.unwrap();
        queue.claim("worker-1").await.unwrap();

        let still_pending = queue.list(Some(JobStatus::Pending)).await.unwrap();
        assert_eq!(still_pending.len(), 1);

        let now_claimed = queue.list(Some(JobStatus::Claimed)).await.unwrap();
        assert_eq!(now_claimed.len(), 1);
    }

    #[tokio::test]
    async fn count_by_status_matches_queue_depth() {
        let queue = JobQueue::new(pool().await);
        queue.enqueue(&Job::new(JobSource::User, 0, 3)).await.unwrap();
        queue.enqueue(&Job::new(JobSource::User, 0, 3)).await.unwrap();
        queue.enqueue(&Job::new(JobSource::User, 0, 3)).await.unwrap();
        queue.claim("worker-1").await.unwrap();

        assert_eq!(queue.count_by_status(JobStatus::Pending).await.unwrap(), 2);
        assert_eq!(queue.count_by_status(JobStatus::Claimed).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancel_on_already_terminal_job_fails_not_found() {
        let queue = JobQueue::new(pool().await);
        let job = Job::new(JobSource::User, 0, 3);
        queue.enqueue(&job).await.unwrap();
        queue.claim("worker-1").await.unwrap();
        queue.release(job.id, JobStatus::Completed, false).await.unwrap();

        let err = queue.cancel(job.id).await.unwrap_err();
        assert_eq!(err.kind, sentinel_types::ErrorKind::NotFound);
    }
}
