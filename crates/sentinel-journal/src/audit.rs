use async_trait::async_trait;
use sentinel_types::{AuditEntry, AuditSink};
use sqlx::{Pool, Sqlite};
use tracing::warn;

/// Appends every audit entry to the `messages_audit` table. Write failures
/// are logged, never propagated — an audit sink must not be able to fail a
/// dispatch the way a missing handler or oversize payload can.
pub struct SqliteAuditSink {
    pool: Pool<Sqlite>,
}

impl SqliteAuditSink {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn write(&self, entry: AuditEntry) {
        let details_json = entry
            .details
            .map(|d| serde_json::to_string(&serde_json::Value::from(d)))
            .transpose();

        let details_json = match details_json {
            Ok(json) => json,
            Err(error) => {
                warn!(%error, "failed to serialize audit entry details");
                return;
            }
        };

        let result = sqlx::query(
            "INSERT INTO messages_audit (id, timestamp, actor, action, risk_level, details_json)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(entry.timestamp.to_rfc3339())
        .bind(entry.actor)
        .bind(entry.action)
        .bind(entry.risk_level)
        .bind(details_json)
        .execute(&self.pool)
        .await;

        if let Err(error) = result {
            warn!(%error, "failed to write audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_types::JsonValue;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn write_persists_an_audit_row() {
        let sink = SqliteAuditSink::new(pool().await);
        sink.write(AuditEntry::new("bridge", "dispatch:execute.request").with_risk_level("low")).await;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages_audit")
            .fetch_one(&sink.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn write_persists_details_json() {
        let sink = SqliteAuditSink::new(pool().await);
        let details = JsonValue::Object(
            [("from".to_string(), JsonValue::String("bridge".into()))].into_iter().collect(),
        );
        sink.write(AuditEntry::new("bridge", "dispatch:execute.request").with_details(details)).await;

        let raw: String = sqlx::query_scalar("SELECT details_json FROM messages_audit LIMIT 1")
            .fetch_one(&sink.pool)
            .await
            .unwrap();
        assert!(raw.contains("bridge"));
    }
}
