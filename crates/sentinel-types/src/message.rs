use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::component::ComponentId;
use crate::json::JsonValue;

/// Hard cap on a serialized message's size; the size-check middleware
/// rejects anything larger (`sentinel-runtime::router`).
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Above this, the size-check middleware warns but still dispatches.
pub const WARN_MESSAGE_BYTES: usize = 100 * 1024;

/// In-process dispatch envelope. Owned by the current middleware frame;
/// immutable once it leaves dispatch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub correlation_id: Uuid,
    pub reply_to: Option<ComponentId>,
    pub timestamp: DateTime<Utc>,
    pub from: ComponentId,
    pub to: ComponentId,
    pub message_type: MessageType,
    pub payload: JsonValue,
    pub job_id: Option<Uuid>,
    pub metadata: BTreeMap<String, JsonValue>,
}

impl Message {
    pub fn request(from: ComponentId, to: ComponentId, message_type: MessageType, payload: JsonValue) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            correlation_id: id,
            reply_to: None,
            timestamp: Utc::now(),
            from,
            to,
            message_type,
            payload,
            job_id: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Build a response preserving the request's correlation-id, per the
    /// router's contract: every dispatched request ends in exactly one
    /// response or error message carrying the same correlation-id.
    pub fn respond(&self, from: ComponentId, message_type: MessageType, payload: JsonValue) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id: self.correlation_id,
            reply_to: None,
            timestamp: Utc::now(),
            from,
            to: self.from.clone(),
            message_type,
            payload,
            job_id: self.job_id,
            metadata: BTreeMap::new(),
        }
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        match self.metadata.get("timeoutMs") {
            Some(JsonValue::Number(n)) => Some(*n as u64),
            _ => None,
        }
    }

    pub fn approx_size(&self) -> usize {
        serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(0)
    }
}

/// Dispatch topic. Capability traffic uses `execute.request`/`execute.response`;
/// the planner/validator loop uses `plan.request`/`plan.response` and
/// `validate.request`/`validate.response`; routing failures use `error`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    PlanRequest,
    PlanResponse,
    ValidateRequest,
    ValidateResponse,
    ExecuteRequest,
    ExecuteResponse,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanRequest => "plan.request",
            Self::PlanResponse => "plan.response",
            Self::ValidateRequest => "validate.request",
            Self::ValidateResponse => "validate.response",
            Self::ExecuteRequest => "execute.request",
            Self::ExecuteResponse => "execute.response",
            Self::Error => "error",
        }
    }
}
