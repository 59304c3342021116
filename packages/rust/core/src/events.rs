//! In-process event bus.
//!
//! [`EventBus`] is constructed once at startup and shared as `Arc<EventBus>`.
//! Handlers registered with [`EventBus::on`] run sequentially, in registration
//! order, on the emitting task. A handler that returns an error or panics is
//! logged and skipped; the remaining handlers still run.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use backfeed_shared::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// A post became public. Payload: `{"post_id": ...}`.
pub const POST_PUBLISHED: &str = "post.published";

/// A published post changed. Payload: `{"post_id": ...}`.
pub const POST_UPDATED: &str = "post.updated";

/// An inbound mention was verified and stored.
pub const WEBMENTION_RECEIVED: &str = "webmention.received";

/// One outbound delivery attempt finished, successfully or not.
pub const WEBMENTION_SENT: &str = "webmention.sent";

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A named notification with a JSON payload.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Dot-separated event name, e.g. `"post.published"`.
    pub name: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Read a string field from the payload.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// A registered event handler.
pub type Handler = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// Name-keyed publish/subscribe hub.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events named `name`.
    pub fn on<F>(&self, name: &str, handler: F)
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers
            .entry(name.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Number of handlers registered for `name`.
    pub fn handler_count(&self, name: &str) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(name).map_or(0, Vec::len)
    }

    /// Deliver an event to every handler registered for `name`.
    ///
    /// Returns the number of handlers that completed successfully.
    pub fn emit(&self, name: &str, payload: serde_json::Value) -> usize {
        // Snapshot so handlers may register further handlers without deadlocking.
        let handlers: Vec<Handler> = {
            let map = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            map.get(name).cloned().unwrap_or_default()
        };

        if handlers.is_empty() {
            debug!(event = name, "no handlers registered");
            return 0;
        }

        let event = Event::new(name, payload);
        let mut delivered = 0;

        for (index, handler) in handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(event = name, handler = index, error = %e, "event handler failed"),
                Err(_) => warn!(event = name, handler = index, "event handler panicked"),
            }
        }

        debug!(event = name, delivered, total = handlers.len(), "event emitted");
        delivered
    }

    /// Serialize `payload` and emit it.
    pub fn emit_serialized<T: Serialize>(&self, name: &str, payload: &T) -> usize {
        match serde_json::to_value(payload) {
            Ok(value) => self.emit(name, value),
            Err(e) => {
                warn!(event = name, error = %e, "failed to serialize event payload");
                0
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<_> = handlers.keys().collect();
        names.sort();
        f.debug_struct("EventBus").field("events", &names).finish()
    }
}
