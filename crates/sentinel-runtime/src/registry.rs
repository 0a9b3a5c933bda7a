use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sentinel_types::{ComponentId, Message, SentinelError};
use tokio_util::sync::CancellationToken;

/// Handler invoked by the router for a registered component.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, message: Message, cancel: CancellationToken) -> Result<Message, SentinelError>;
}

/// Name -> handler map for in-process message dispatch.
///
/// Protected by a single `RwLock`: mutated rarely (startup/shutdown
/// registration), read on every dispatch.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    handlers: Arc<RwLock<HashMap<ComponentId, Arc<dyn Handler>>>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ComponentId, handler: Arc<dyn Handler>) -> Result<(), SentinelError> {
        let mut handlers = self.handlers.write().expect("registry lock poisoned");
        if handlers.contains_key(&id) {
            return Err(SentinelError::conflict(format!("component '{id}' already registered")));
        }
        handlers.insert(id, handler);
        Ok(())
    }

    pub fn unregister(&self, id: &ComponentId) -> Result<(), SentinelError> {
        let mut handlers = self.handlers.write().expect("registry lock poisoned");
        if handlers.remove(id).is_none() {
            return Err(SentinelError::not_found(format!("component '{id}' not registered")));
        }
        Ok(())
    }

    pub fn get_handler(&self, id: &ComponentId) -> Option<Arc<dyn Handler>> {
        self.handlers.read().expect("registry lock poisoned").get(id).cloned()
    }

    pub fn has(&self, id: &ComponentId) -> bool {
        self.handlers.read().expect("registry lock poisoned").contains_key(id)
    }

    pub fn list_ids(&self) -> Vec<ComponentId> {
        self.handlers.read().expect("registry lock poisoned").keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.handlers.write().expect("registry lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_types::MessageType;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn handle(&self, message: Message, _cancel: CancellationToken) -> Result<Message, SentinelError> {
            Ok(message.respond(message.to.clone(), MessageType::ExecuteResponse, message.payload.clone()))
        }
    }

    fn cid(s: &str) -> ComponentId {
        ComponentId::parse(s).unwrap()
    }

    #[test]
    fn register_then_get_handler_round_trips() {
        let registry = ComponentRegistry::new();
        registry.register(cid("scout"), Arc::new(Echo)).unwrap();
        assert!(registry.has(&cid("scout")));
        assert!(registry.get_handler(&cid("scout")).is_some());
    }

    #[test]
    fn register_duplicate_fails_with_conflict() {
        let registry = ComponentRegistry::new();
        registry.register(cid("scout"), Arc::new(Echo)).unwrap();
        let err = registry.register(cid("scout"), Arc::new(Echo)).unwrap_err();
        assert_eq!(err.kind, sentinel_types::ErrorKind::Conflict);
    }

    #[test]
    fn unregister_missing_fails_with_not_found() {
        let registry = ComponentRegistry::new();
        let err = registry.unregister(&cid("scout")).unwrap_err();
        assert_eq!(err.kind, sentinel_types::ErrorKind::NotFound);
    }

    #[test]
    fn get_handler_for_unknown_id_is_none() {
        let registry = ComponentRegistry::new();
        assert!(registry.get_handler(&cid("gear:file-search")).is_none());
    }

    #[test]
    fn clear_removes_all_registrations() {
        let registry = ComponentRegistry::new();
        registry.register(cid("scout"), Arc::new(Echo)).unwrap();
        registry.register(cid("sentinel"), Arc::new(Echo)).unwrap();
        registry.clear();
        assert!(registry.list_ids().is_empty());
    }
}
