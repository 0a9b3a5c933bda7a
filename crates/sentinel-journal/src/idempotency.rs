use async_trait::async_trait;
use chrono::Utc;
use sentinel_types::{ExecutionLogStatus, IdempotencyKey, JsonValue};
use sqlx::{Pool, Sqlite};

use crate::error::JournalError;

/// Result of `IdempotencyLog::check`: tells the orchestrator whether a step
/// must actually run or whether a cached result can be adopted.
#[derive(Clone, Debug, PartialEq)]
pub enum CheckOutcome {
    /// No entry existed, or the prior entry was `started`/`failed`: run the
    /// step. The log now holds a fresh `started` entry.
    Execute,
    /// The prior entry was `completed`: skip execution, adopt this result.
    Cached(JsonValue),
}

/// Stable-key execution log with started/completed/failed states.
///
/// `check` is the single entry point that keeps a retried step pinned to the
/// same slot: insert-if-absent, return-cached-if-completed, or
/// reset-to-started otherwise. Implementations must run the whole operation
/// as one transaction so two concurrent callers on the same key never both
/// get `Execute`.
#[async_trait]
pub trait IdempotencyLog: Send + Sync {
    async fn check(&self, job_id: &str, step_id: &str) -> Result<CheckOutcome, JournalError>;
    async fn record_completion(&self, key: &IdempotencyKey, result: JsonValue) -> Result<(), JournalError>;
    async fn record_failure(&self, key: &IdempotencyKey) -> Result<(), JournalError>;
}

pub struct SqliteIdempotencyLog {
    pool: Pool<Sqlite>,
}

impl SqliteIdempotencyLog {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

fn status_str(status: ExecutionLogStatus) -> &'static str {
    match status {
        ExecutionLogStatus::Started => "started",
        ExecutionLogStatus::Completed => "completed",
        ExecutionLogStatus::Failed => "failed",
    }
}

#[async_trait]
impl IdempotencyLog for SqliteIdempotencyLog {
    async fn check(&self, job_id: &str, step_id: &str) -> Result<CheckOutcome, JournalError> {
        let key = IdempotencyKey::new(job_id, step_id);
        let key_hex = key.to_hex();
        let now = Utc::now();

        // BEGIN IMMEDIATE grabs the write lock up front so two concurrent
        // callers on the same key serialize instead of racing past the
        // read and both deciding to insert.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let existing: Option<(String, Option<String>)> =
            sqlx::query_as("SELECT status, result_json FROM execution_log WHERE key = ?")
                .bind(&key_hex)
                .fetch_optional(&mut *conn)
                .await?;

        let outcome = match existing {
            None => {
                sqlx::query(
                    "INSERT INTO execution_log (key, job_id, step_id, status, started_at, completed_at, result_json)
                     VALUES (?, ?, ?, 'started', ?, NULL, NULL)",
                )
                .bind(&key_hex)
                .bind(job_id)
                .bind(step_id)
                .bind(now.to_rfc3339())
                .execute(&mut *conn)
                .await?;
                CheckOutcome::Execute
            }
            Some((status, result_json)) if status == "completed" => {
                let result = result_json
                    .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
                    .transpose()
                    .map_err(|e| JournalError::Transaction(e.to_string()))?
                    .map(JsonValue::from)
                    .unwrap_or(JsonValue::Null);
                CheckOutcome::Cached(result)
            }
            Some(_) => {
                sqlx::query(
                    "UPDATE execution_log
                     SET status = 'started', started_at = ?, completed_at = NULL, result_json = NULL
                     WHERE key = ?",
                )
                .bind(now.to_rfc3339())
                .bind(&key_hex)
                .execute(&mut *conn)
                .await?;
                CheckOutcome::Execute
            }
        };

        sqlx::query("COMMIT").execute(&mut *conn).await?;
        Ok(outcome)
    }

    async fn record_completion(&self, key: &IdempotencyKey, result: JsonValue) -> Result<(), JournalError> {
        let key_hex = key.to_hex();
        let now = Utc::now();
        let result_json = serde_json::to_string(&serde_json::Value::from(result))
            .map_err(|e| JournalError::Transaction(e.to_string()))?;

        let affected = sqlx::query(
            "UPDATE execution_log
             SET status = 'completed', completed_at = ?, result_json = ?
             WHERE key = ? AND status = 'started'",
        )
        .bind(now.to_rfc3339())
        .bind(result_json)
        .bind(&key_hex)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(JournalError::NotFound { key: key_hex });
        }
        Ok(())
    }

    async fn record_failure(&self, key: &IdempotencyKey) -> Result<(), JournalError> {
        let key_hex = key.to_hex();

        let affected = sqlx::query(
            "UPDATE execution_log
             SET status = 'failed', completed_at = NULL, result_json = NULL
             WHERE key = ? AND status = 'started'",
        )
        .bind(&key_hex)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(JournalError::NotFound { key: key_hex });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn in_memory_pool() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn check_on_absent_key_inserts_started_and_returns_execute() {
        let log = SqliteIdempotencyLog::new(in_memory_pool().await);
        let outcome = log.check("job-1", "step-1").await.unwrap();
        assert_eq!(outcome, CheckOutcome::Execute);
    }

    #[tokio::test]
    async fn check_on_completed_key_returns_cached_result() {
        let log = SqliteIdempotencyLog::new(in_memory_pool().await);
        let key = IdempotencyKey::new("job-1", "step-1");
        log.check("job-1", "step-1").await.unwrap();
        log.record_completion(&key, JsonValue::String("done".into())).await.unwrap();

        let outcome = log.check("job-1", "step-1").await.unwrap();
        assert_eq!(outcome, CheckOutcome::Cached(JsonValue::String("done".into())));
    }

    #[tokio::test]
    async fn check_on_failed_key_resets_to_started() {
        let log = SqliteIdempotencyLog::new(in_memory_pool().await);
        let key = IdempotencyKey::new("job-1", "step-1");
        log.check("job-1", "step-1").await.unwrap();
        log.record_failure(&key).await.unwrap();

        let outcome = log.check("job-1", "step-1").await.unwrap();
        assert_eq!(outcome, CheckOutcome::Execute);
    }

    #[tokio::test]
    async fn record_completion_happens_before_subsequent_check_sees_cached() {
        let log = SqliteIdempotencyLog::new(in_memory_pool().await);
        let key = IdempotencyKey::new("job-2", "step-9");
        log.check("job-2", "step-9").await.unwrap();
        log.record_completion(&key, JsonValue::Number(1.0)).await.unwrap();

        for _ in 0..3 {
            assert_eq!(
                log.check("job-2", "step-9").await.unwrap(),
                CheckOutcome::Cached(JsonValue::Number(1.0))
            );
        }
    }

    #[tokio::test]
    async fn record_completion_without_started_entry_is_not_found() {
        let log = SqliteIdempotencyLog::new(in_memory_pool().await);
        let key = IdempotencyKey::new("job-3", "step-1");
        let result = log.record_completion(&key, JsonValue::Null).await;
        assert!(matches!(result, Err(JournalError::NotFound { .. })));
    }
}
