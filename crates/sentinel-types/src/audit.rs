use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::json::JsonValue;

/// One row written by the router's audit middleware, or by any other
/// component that wants a durable trail of a risk-bearing action.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub risk_level: Option<String>,
    pub details: Option<JsonValue>,
}

impl AuditEntry {
    pub fn new(actor: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: actor.into(),
            action: action.into(),
            risk_level: None,
            details: None,
        }
    }

    pub fn with_risk_level(mut self, risk_level: impl Into<String>) -> Self {
        self.risk_level = Some(risk_level.into());
        self
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }
}

/// Seam consumed by `sentinel-runtime::router`'s audit middleware.
/// Concrete implementations (no-op, SQLite-backed) live where they're used.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, entry: AuditEntry);
}
