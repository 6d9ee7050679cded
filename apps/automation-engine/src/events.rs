//! Lifecycle event surface.
//!
//! Synchronous publish to registered handlers keyed by event-type string.
//! Handler faults are contained: a failing handler is logged and skipped,
//! never propagated to the publisher or to other handlers.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

/// Event as delivered to handlers.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Event-type string (`STATUS_CHANGE`, `ORDER_COMPLETE`, ...).
    pub kind: String,
    /// Order the event concerns, when applicable.
    pub order_id: Option<String>,
    /// Free-form payload.
    pub payload: serde_json::Value,
    /// Publish time.
    pub at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Build an envelope stamped now.
    #[must_use]
    pub fn new(kind: impl Into<String>, order_id: Option<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            order_id,
            payload,
            at: Utc::now(),
        }
    }
}

/// Handler callback. Returning an error marks the handler as failed for
/// this event only.
pub type EventHandler = Box<dyn Fn(&EventEnvelope) -> anyhow::Result<()> + Send + Sync>;

/// Token returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    kind: String,
    id: u64,
}

/// Owned subscribe/unsubscribe/publish mechanism.
///
/// An explicit collection injected at construction, not a process-wide
/// singleton, so independent trackers can coexist in tests.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<(u64, EventHandler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event-type string.
    pub fn subscribe(
        &self,
        kind: impl Into<String>,
        handler: impl Fn(&EventEnvelope) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        let kind = kind.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.handlers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(kind.clone())
            .or_default()
            .push((id, Box::new(handler)));

        Subscription { kind, id }
    }

    /// Remove a previously registered handler. Unknown tokens are ignored.
    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(list) = handlers.get_mut(&subscription.kind) {
            list.retain(|(id, _)| *id != subscription.id);
        }
    }

    /// Publish an event to every handler registered for its kind.
    ///
    /// Handlers run synchronously in subscription order; a failing handler
    /// is logged and the rest still run.
    pub fn publish(&self, event: &EventEnvelope) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let Some(list) = handlers.get(&event.kind) else {
            return;
        };

        for (id, handler) in list {
            if let Err(error) = handler(event) {
                warn!(
                    kind = %event.kind,
                    handler_id = *id,
                    error = %error,
                    "event handler failed"
                );
            }
        }
    }

    /// Number of handlers registered for a kind.
    #[must_use]
    pub fn handler_count(&self, kind: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(kind)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("EventBus").field("kinds", &kinds).finish()
    }
}
