//! Per-request-tree event bus for lifecycle telemetry.
//!
//! Best-effort, fire-and-forget pub/sub: `emit` invokes every current
//! handler synchronously, and each handler call is individually guarded so
//! an observer can never abort the primary flow. There is no queue -- with
//! no subscribers, events are simply dropped. A bus instance is scoped to
//! one request's call tree and never shared across unrelated requests.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;

type Handler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Publish/subscribe bus for delegation telemetry.
///
/// Cheap to clone; clones share the same subscriber set.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Mutex<HashMap<u64, Handler>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. The returned [`Subscription`] unsubscribes when
    /// dropped (or explicitly via [`Subscription::unsubscribe`]).
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().unwrap().insert(id, Arc::new(handler));
        Subscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Invoke every current handler with the event.
    ///
    /// Handlers are called outside the subscriber lock, so a handler may
    /// itself emit or subscribe without deadlocking. A panicking handler is
    /// caught and logged; it never propagates to the emitter.
    pub fn emit(&self, event_type: &str, data: Value) {
        let handlers: Vec<Handler> = {
            let guard = self.handlers.lock().unwrap();
            guard.values().cloned().collect()
        };

        for handler in handlers {
            let result = catch_unwind(AssertUnwindSafe(|| handler(event_type, &data)));
            if result.is_err() {
                tracing::warn!(event_type, "event bus handler panicked; discarding");
            }
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle for one bus subscription.
pub struct Subscription {
    id: u64,
    handlers: Weak<Mutex<HashMap<u64, Handler>>>,
}

impl Subscription {
    /// Remove the handler now instead of at drop time.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handlers) = self.handlers.upgrade() {
            handlers.lock().unwrap().remove(&self.id);
        }
    }
}
