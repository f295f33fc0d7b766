//! In-process notification sink.
//!
//! The runtime announces lifecycle events (command executed, level up) to
//! other in-process subscribers through an explicit listener registry.
//! Delivery is synchronous and in registration order; a failing handler is
//! logged and never stops the remaining handlers or the publisher.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

/// Kinds of notifications the runtime publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A command finished executing.
    CommandExecuted,
    /// A member crossed a level threshold.
    LevelUp,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::CommandExecuted => "command_executed",
            EventKind::LevelUp => "level_up",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered listener. Returning `Err` is logged, not propagated.
pub type EventHandler = Box<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Explicit subscribe/publish registry.
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for `kind`. Handlers run in registration order.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Box::new(handler));
        debug!("Subscriber registered for {}", kind);
    }

    /// Deliver `payload` to every subscriber of `kind`, best-effort.
    ///
    /// Returns the number of handlers that ran without error.
    pub fn publish(&self, kind: EventKind, payload: &Value) -> usize {
        let handlers = self.handlers.read();
        let Some(listeners) = handlers.get(&kind) else {
            return 0;
        };

        let mut delivered = 0;
        for handler in listeners {
            match handler(payload) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Subscriber for {} failed: {}", kind, e),
            }
        }

        delivered
    }

    /// Number of subscribers for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("EventBus")
            .field("kinds", &handlers.len())
            .finish()
    }
}
