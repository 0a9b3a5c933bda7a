use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sentinel_types::{
    AuditEntry, AuditSink, ComponentId, JsonValue, Message, MessageType, SentinelError,
    MAX_MESSAGE_BYTES, WARN_MESSAGE_BYTES,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::budget::CompositeSignal;
use crate::registry::ComponentRegistry;

pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn write(&self, _entry: AuditEntry) {}
}

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
pub type NextFn = Box<dyn FnOnce(Message, CancellationToken) -> BoxFuture<Message> + Send>;

/// One link in the dispatch chain: `(message, signal, next) -> message`.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn call(&self, message: Message, signal: CancellationToken, next: NextFn) -> Message;
}

fn error_message(request: &Message, error: SentinelError) -> Message {
    let payload = serde_json::to_value(&error).unwrap_or(serde_json::Value::Null);
    request.respond(request.to.clone(), MessageType::Error, payload.into())
}

/// Catches any propagated failure from downstream middleware and converts it
/// to a well-formed `error` message. Never itself fails.
struct ErrorWrap;

#[async_trait]
impl Middleware for ErrorWrap {
    async fn call(&self, message: Message, signal: CancellationToken, next: NextFn) -> Message {
        next(message, signal).await
    }
}

struct Audit {
    sink: Arc<dyn AuditSink>,
}

#[async_trait]
impl Middleware for Audit {
    async fn call(&self, message: Message, signal: CancellationToken, next: NextFn) -> Message {
        let action = format!("dispatch:{}", message.message_type.as_str());
        let from = message.from.clone();
        let to = message.to.clone();
        let details = JsonValue::Object(
            [
                ("from".to_string(), JsonValue::String(from.to_string())),
                ("to".to_string(), JsonValue::String(to.to_string())),
            ]
            .into_iter()
            .collect(),
        );
        let response = next(message, signal).await;
        self.sink
            .write(AuditEntry::new(from.to_string(), action).with_details(details))
            .await;
        response
    }
}

struct Latency;

#[async_trait]
impl Middleware for Latency {
    async fn call(&self, message: Message, signal: CancellationToken, next: NextFn) -> Message {
        let started = Instant::now();
        let message_type = message.message_type.as_str();
        let response = next(message, signal).await;
        let elapsed = started.elapsed();
        if elapsed.as_secs() >= 1 {
            warn!(message_type, elapsed_ms = elapsed.as_millis() as u64, "slow dispatch");
        } else {
            debug!(message_type, elapsed_ms = elapsed.as_millis() as u64, "dispatch complete");
        }
        response
    }
}

struct SizeCheck;

#[async_trait]
impl Middleware for SizeCheck {
    async fn call(&self, message: Message, signal: CancellationToken, next: NextFn) -> Message {
        let size = message.approx_size();
        if size > MAX_MESSAGE_BYTES {
            return error_message(&message, SentinelError::validation(format!(
                "message of {size} bytes exceeds the {MAX_MESSAGE_BYTES} byte hard cap"
            )));
        }
        if size > WARN_MESSAGE_BYTES {
            warn!(size, "message exceeds warn threshold");
        }
        next(message, signal).await
    }
}

struct Dispatch {
    registry: ComponentRegistry,
}

#[async_trait]
impl Middleware for Dispatch {
    async fn call(&self, message: Message, signal: CancellationToken, _next: NextFn) -> Message {
        let Some(handler) = self.registry.get_handler(&message.to) else {
            return error_message(&message, SentinelError::not_found(format!("no handler registered for '{}'", message.to)));
        };

        let timeout_ms = message.timeout_ms();
        let composite = CompositeSignal::new(
            timeout_ms.map(std::time::Duration::from_millis),
            &[signal],
        );
        let handler_signal = composite.token();

        let result = handler.handle(message.clone(), handler_signal).await;
        composite.cleanup();

        match result {
            Ok(response) => response,
            Err(error) => error_message(&message, error),
        }
    }
}

/// Dispatches a request to its target component's handler while enforcing
/// size, timeout, audit, and latency contracts via a fixed middleware chain
/// (error-wrap -> audit -> latency -> size-check -> dispatch), with room for
/// caller-supplied middleware inserted before dispatch.
pub struct MessageRouter {
    chain: Arc<Vec<Arc<dyn Middleware>>>,
    registry: ComponentRegistry,
}

impl MessageRouter {
    pub fn new(registry: ComponentRegistry, audit_sink: Arc<dyn AuditSink>) -> Self {
        Self::with_extra_middleware(registry, audit_sink, Vec::new())
    }

    pub fn with_extra_middleware(
        registry: ComponentRegistry,
        audit_sink: Arc<dyn AuditSink>,
        extra: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        let mut chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(ErrorWrap),
            Arc::new(Audit { sink: audit_sink }),
            Arc::new(Latency),
            Arc::new(SizeCheck),
        ];
        chain.extend(extra);
        chain.push(Arc::new(Dispatch { registry: registry.clone() }));
        Self { chain: Arc::new(chain), registry }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub async fn dispatch(&self, message: Message, signal: CancellationToken) -> Message {
        run_chain(self.chain.clone(), 0, message, signal).await
    }
}

fn run_chain(chain: Arc<Vec<Arc<dyn Middleware>>>, index: usize, message: Message, signal: CancellationToken) -> BoxFuture<Message> {
    Box::pin(async move {
        if index >= chain.len() {
            return message;
        }
        let next_chain = chain.clone();
        let next: NextFn = Box::new(move |message, signal| run_chain(next_chain, index + 1, message, signal));
        chain[index].call(message, signal, next).await
    })
}
