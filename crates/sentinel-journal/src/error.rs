use sentinel_types::{ErrorKind, SentinelError};

/// Failures specific to the execution log / idempotency store.
///
/// Maps onto `sentinel_types::ErrorKind` at the boundary (`into_sentinel_error`)
/// so callers above this crate deal in one error vocabulary.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("no execution log entry for key {key}")]
    NotFound { key: String },

    #[error("execution log entry for key {key} already completed")]
    AlreadyCompleted { key: String },

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl JournalError {
    pub fn into_sentinel_error(self) -> SentinelError {
        match self {
            Self::NotFound { key } => SentinelError::not_found(format!("execution log entry {key} not found")),
            Self::AlreadyCompleted { key } => {
                SentinelError::conflict(format!("execution log entry {key} already completed"))
            }
            Self::Transaction(msg) => SentinelError::new(ErrorKind::Internal, msg),
            Self::Database(err) => SentinelError::new(ErrorKind::Internal, err.to_string()),
            Self::Migration(err) => SentinelError::new(ErrorKind::Internal, err.to_string()),
        }
    }
}
