use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sentinel_types::{ComponentId, JsonValue, Message, MessageType, SentinelError};
use tokio_util::sync::CancellationToken;

use crate::registry::Handler;

/// Capability contract: a `gear:<name>` handler receives
/// `{capability, action, parameters, stepId}` and returns `{result}` or
/// `{error: {code, message}}`. Capability authors implement this trait;
/// actual sandboxed subprocess spawning is out of core scope — this is the
/// in-process seam the orchestrator dispatches through via the router.
#[async_trait]
pub trait GearHandle: Send + Sync {
    async fn execute(
        &self,
        action: &str,
        parameters: &BTreeMap<String, JsonValue>,
        step_id: &str,
        cancel: CancellationToken,
    ) -> Result<JsonValue, SentinelError>;
}

/// Adapts a `GearHandle` into the `ComponentRegistry`'s `Handler` trait,
/// unpacking the `execute.request` payload and repacking the result.
pub struct GearAdapter {
    capability: String,
    handle: Arc<dyn GearHandle>,
}

impl GearAdapter {
    pub fn new(capability: impl Into<String>, handle: Arc<dyn GearHandle>) -> Self {
        Self { capability: capability.into(), handle }
    }
}

#[async_trait]
impl Handler for GearAdapter {
    async fn handle(&self, message: Message, cancel: CancellationToken) -> Result<Message, SentinelError> {
        let payload = message.payload.as_object().ok_or_else(|| {
            SentinelError::validation("execute.request payload must be an object")
        })?;

        let action = payload
            .get("action")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| SentinelError::validation("execute.request missing 'action'"))?;
        let step_id = payload
            .get("stepId")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| SentinelError::validation("execute.request missing 'stepId'"))?;
        let parameters = payload
            .get("parameters")
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default();

        let result = self.handle.execute(action, &parameters, step_id, cancel).await?;
        let response_payload = JsonValue::Object(
            [("result".to_string(), result)].into_iter().collect(),
        );
        Ok(message.respond(ComponentId::parse(&format!("gear:{}", self.capability))?, MessageType::ExecuteResponse, response_payload))
    }
}

/// Test/demo double: echoes its parameters back as the result. Used by the
/// orchestrator's integration tests in place of a real sandboxed capability.
pub struct EchoGear;

#[async_trait]
impl GearHandle for EchoGear {
    async fn execute(
        &self,
        _action: &str,
        parameters: &BTreeMap<String, JsonValue>,
        _step_id: &str,
        _cancel: CancellationToken,
    ) -> Result<JsonValue, SentinelError> {
        Ok(JsonValue::Object(parameters.clone().into_iter().collect()))
    }
}
