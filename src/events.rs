//! Pub/sub surface for card instances.
//!
//! Handlers are held behind `Arc` so registration has set semantics by
//! pointer identity: registering the same handler twice for the same type
//! is a no-op. Dispatch is synchronous, in registration order.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

/// Structured payload delivered to handlers. Every payload carries the
/// owning card id under the `card` key.
pub type EventPayload = Map<String, Value>;

/// Handler callback. Runs outside the runtime lock, so re-entering the
/// public card API from inside a handler is allowed.
pub type Handler = Arc<dyn Fn(&EventPayload) + Send + Sync>;

/// Event types a card emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ContentChange,
    CardClick,
    FieldClick,
    ImgClick,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentChange => "content-change",
            Self::CardClick => "card-click",
            Self::FieldClick => "field-click",
            Self::ImgClick => "img-click",
            Self::Error => "error",
        }
    }
}

/// Insertion-ordered handler sets keyed by event type.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: HashMap<EventType, Vec<Handler>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `type`. Duplicate registration of the same
    /// `Arc` is a no-op.
    pub fn on(&mut self, event: EventType, handler: Handler) {
        let handlers = self.entries.entry(event).or_default();
        if handlers.iter().any(|existing| Arc::ptr_eq(existing, &handler)) {
            return;
        }
        handlers.push(handler);
    }

    /// Remove one handler, or all handlers for `event` when `handler` is
    /// `None`.
    pub fn off(&mut self, event: EventType, handler: Option<&Handler>) {
        match handler {
            Some(target) => {
                if let Some(handlers) = self.entries.get_mut(&event) {
                    handlers.retain(|existing| !Arc::ptr_eq(existing, target));
                }
            }
            None => {
                self.entries.remove(&event);
            }
        }
    }

    /// Snapshot of the handlers for `event`, in registration order.
    pub fn handlers(&self, event: EventType) -> Vec<Handler> {
        self.entries.get(&event).cloned().unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self, event: EventType) -> usize {
        self.entries.get(&event).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_handler(log: Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Handler {
        Arc::new(move |_payload| log.lock().unwrap().push(tag))
    }

    #[test]
    fn duplicate_registration_is_a_noop() {
        let mut registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recording_handler(log, "a");
        registry.on(EventType::Error, handler.clone());
        registry.on(EventType::Error, handler);
        assert_eq!(registry.len(EventType::Error), 1);
    }

    #[test]
    fn dispatch_order_follows_registration() {
        let mut registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.on(EventType::ContentChange, recording_handler(log.clone(), "a"));
        registry.on(EventType::ContentChange, recording_handler(log.clone(), "b"));

        let payload = EventPayload::new();
        for handler in registry.handlers(EventType::ContentChange) {
            handler(&payload);
        }
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn off_removes_one_or_all() {
        let mut registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = recording_handler(log.clone(), "a");
        let second = recording_handler(log.clone(), "b");
        registry.on(EventType::CardClick, first.clone());
        registry.on(EventType::CardClick, second);

        registry.off(EventType::CardClick, Some(&first));
        assert_eq!(registry.len(EventType::CardClick), 1);

        registry.off(EventType::CardClick, None);
        assert_eq!(registry.len(EventType::CardClick), 0);
    }
}
