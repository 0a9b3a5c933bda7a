pub mod audit;
pub mod error;
pub mod idempotency;
pub mod replay;
pub mod store;

pub use audit::SqliteAuditSink;
pub use error::JournalError;
pub use idempotency::{CheckOutcome, IdempotencyLog, SqliteIdempotencyLog};
pub use replay::ReplayCache;
pub use store::{create_sqlite_pool, run_migrations, SqliteStoreConfig};
