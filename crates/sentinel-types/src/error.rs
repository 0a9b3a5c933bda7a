use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical category for a failure anywhere in the core.
///
/// Coarse-grained by design: used for policy decisions (is this retriable?)
/// and as an observability dimension in logs. Concrete error codes surfaced
/// to a gateway are derived from this, not the other way around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input: bad component-id, payload schema violation, oversize message.
    Validation,
    /// Unknown component, job, or decision.
    NotFound,
    /// Duplicate registration or install.
    Conflict,
    /// Deadline exhausted at any level (budget, composite signal).
    Timeout,
    /// LLM adapter or structured-response parse failure.
    Provider,
    /// Capability subprocess failure or integrity mismatch.
    Sandbox,
    /// Gateway-supplied auth failure, propagated unchanged.
    Auth,
    /// Caller or operator requested stop.
    Cancelled,
    /// Unclassified; always logged at error level.
    Internal,
}

impl ErrorKind {
    /// Whether an error of this kind is safe to retry without operator intervention.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Provider | Self::Sandbox)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Timeout => "timeout",
            Self::Provider => "provider",
            Self::Sandbox => "sandbox",
            Self::Auth => "auth",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// Structured error shared across router, queue, orchestrator, and the
/// gateway seam.
///
/// Replaces raw strings with a stable shape: `kind` drives retry/policy
/// decisions, `message` is safe to show a user, `detail` is optional
/// diagnostic context for logs.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct SentinelError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SentinelError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Provider, message)
    }

    pub fn retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}
