//! Typed pub-sub event bus over the closed event catalog.
//!
//! One instance is created at process start and handed to every component
//! that publishes or subscribes (no ambient global). Emission is synchronous:
//! handlers run inline, in subscription order, and a failing handler never
//! blocks the handlers after it nor surfaces to the emitter.

use anyhow::Result;
use common::{CoreError, Event, EventType};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Subscriber callback. Handlers are synchronous; anything long-running should
/// hand off to its own task.
pub type EventHandler = Box<dyn Fn(&Event) -> Result<()> + Send + Sync>;

pub struct EventBus {
    subscribers: RwLock<HashMap<EventType, Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe a handler to an event type. Handlers are notified in the
    /// order they subscribed.
    pub async fn subscribe<F>(&self, event_type: EventType, handler: F)
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .await
            .entry(event_type)
            .or_default()
            .push(Box::new(handler));
        debug!("Subscribed handler to '{}'", event_type);
    }

    /// Subscribe by wire name. Names outside the catalog fail fast.
    pub async fn subscribe_named<F>(&self, name: &str, handler: F) -> Result<(), CoreError>
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        let event_type: EventType = name.parse()?;
        self.subscribe(event_type, handler).await;
        Ok(())
    }

    /// Emit an event to every subscribed handler, in subscription order.
    /// Returns the immutable event that was delivered.
    pub async fn emit(&self, event_type: EventType, payload: Value) -> Event {
        let event = Event::new(event_type, payload);
        debug!("Emitting '{}' ({})", event_type, event.id);

        let subscribers = self.subscribers.read().await;
        for handler in subscribers.get(&event_type).into_iter().flatten() {
            if let Err(e) = handler(&event) {
                warn!("Handler for '{}' failed: {}", event_type, e);
            }
        }
        event
    }

    /// Emit by wire name. Names outside the catalog fail fast.
    pub async fn emit_named(&self, name: &str, payload: Value) -> Result<Event, CoreError> {
        let event_type: EventType = name.parse()?;
        Ok(self.emit(event_type, payload).await)
    }

    pub async fn subscriber_count(&self, event_type: EventType) -> usize {
        self.subscribers
            .read()
            .await
            .get(&event_type)
            .map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(EventType::VoteCast, move |_event| {
                seen.lock().unwrap().push(tag);
                Ok(())
            })
            .await;
        }

        bus.emit(EventType::VoteCast, json!({"proposal": "prop-007"}))
            .await;
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_later_handlers() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        {
            let seen = Arc::clone(&seen);
            bus.subscribe(EventType::AlertTriggered, move |_event| {
                seen.lock().unwrap().push("faulty");
                Err(anyhow!("handler exploded"))
            })
            .await;
        }
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(EventType::AlertTriggered, move |_event| {
                seen.lock().unwrap().push("healthy");
                Ok(())
            })
            .await;
        }

        bus.emit(EventType::AlertTriggered, json!({"kind": "governance"}))
            .await;
        assert_eq!(*seen.lock().unwrap(), vec!["faulty", "healthy"]);
    }

    #[tokio::test]
    async fn test_unknown_name_rejected() {
        let bus = EventBus::new();

        let err = bus
            .subscribe_named("not_in_catalog", |_event| Ok(()))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::UnknownEventType("not_in_catalog".to_string())
        );

        let err = bus.emit_named("not_in_catalog", json!({})).await.unwrap_err();
        assert_eq!(
            err,
            CoreError::UnknownEventType("not_in_catalog".to_string())
        );
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        let event = bus.emit(EventType::NewBlock, json!({"slot": 15740321})).await;
        assert_eq!(event.event_type, EventType::NewBlock);
        assert_eq!(bus.subscriber_count(EventType::NewBlock).await, 0);
    }
}
