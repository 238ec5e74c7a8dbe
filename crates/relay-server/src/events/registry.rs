//! Event registry and async dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use relay_protocol::packet::is_reserved_event;
use tracing::{debug, error, warn};

use super::context::EventContext;
use crate::metrics::{EVENT_DURATION_SECONDS, EVENTS_HANDLED_TOTAL, EVENTS_UNHANDLED_TOTAL};

/// Trait implemented by every event handler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one event.
    async fn handle(&self, ctx: EventContext);
}

/// Registry mapping event names to handlers, optionally per namespace.
pub struct EventRegistry {
    global: HashMap<String, Arc<dyn EventHandler>>,
    scoped: HashMap<(String, String), Arc<dyn EventHandler>>,
}

impl EventRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            global: HashMap::new(),
            scoped: HashMap::new(),
        }
    }

    /// Maximum time a single handler is allowed to run.
    const HANDLER_TIMEOUT: Duration = Duration::from_secs(10);

    /// Register a handler for `event` in every namespace.
    pub fn register(&mut self, event: &str, handler: impl EventHandler + 'static) {
        let _ = self.global.insert(event.to_owned(), Arc::new(handler));
    }

    /// Register a handler for `event` in `namespace` only. Takes precedence
    /// over a global handler of the same name.
    pub fn register_for(&mut self, namespace: &str, event: &str, handler: impl EventHandler + 'static) {
        let _ = self
            .scoped
            .insert((namespace.to_owned(), event.to_owned()), Arc::new(handler));
    }

    /// Handler for `event` received in `namespace`.
    pub fn resolve(&self, namespace: &str, event: &str) -> Option<Arc<dyn EventHandler>> {
        self.scoped
            .get(&(namespace.to_owned(), event.to_owned()))
            .or_else(|| self.global.get(event))
            .cloned()
    }

    /// Whether `event` has a handler in `namespace`.
    pub fn has_event(&self, namespace: &str, event: &str) -> bool {
        self.resolve(namespace, event).is_some()
    }

    /// Event names reachable from `namespace` (sorted).
    pub fn events(&self, namespace: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .global
            .keys()
            .cloned()
            .chain(
                self.scoped
                    .keys()
                    .filter(|(nsp, _)| nsp == namespace)
                    .map(|(_, event)| event.clone()),
            )
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Dispatch an event to its handler. Returns `false` when no handler ran.
    ///
    /// Reserved names are refused. Unknown events are dropped; an ack the
    /// sender asked for is never answered.
    pub async fn dispatch(&self, ctx: EventContext) -> bool {
        let event = ctx.event.clone();
        if is_reserved_event(&event) {
            warn!(event, socket_id = %ctx.socket.id(), "client emitted a reserved event, ignoring");
            counter!(EVENTS_UNHANDLED_TOTAL, "reason" => "reserved").increment(1);
            return false;
        }

        let Some(handler) = self.resolve(ctx.namespace(), &event) else {
            debug!(
                event,
                namespace = ctx.namespace(),
                wants_ack = ctx.wants_ack(),
                "no handler for event"
            );
            counter!(EVENTS_UNHANDLED_TOTAL, "reason" => "unknown").increment(1);
            return false;
        };

        counter!(EVENTS_HANDLED_TOTAL, "event" => event.clone()).increment(1);
        let start = Instant::now();
        if tokio::time::timeout(Self::HANDLER_TIMEOUT, handler.handle(ctx))
            .await
            .is_err()
        {
            error!(event, "event handler timed out after {:?}", Self::HANDLER_TIMEOUT);
        }

        let duration = start.elapsed();
        histogram!(EVENT_DURATION_SECONDS, "event" => event.clone()).record(duration.as_secs_f64());
        if duration.as_secs() >= 1 {
            warn!(event, duration_secs = duration.as_secs_f64(), "slow event handler");
        }
        true
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}
