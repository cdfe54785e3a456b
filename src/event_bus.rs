//! Named-event publish/subscribe bus.
//!
//! Abstracts the push transport: the transport calls [`EventBus::emit`] for
//! every frame it receives, consumers register handlers per event name.
//! Handlers run synchronously, in registration order, on the emitting task.
//! A handler that fails or panics is logged and does not stop delivery to the
//! handlers registered after it.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde_json::Value;
use tracing::{debug, error, warn};

/// Event names produced by the notification backend.
pub mod events {
    /// Full notification record.
    pub const NEW_NOTIFICATION: &str = "new_notification";
    /// Someone validated one of the user's claims.
    pub const VALIDATION_RECEIVED: &str = "validation_received";
    /// Community consensus reached on one of the user's claims.
    pub const CONSENSUS_REACHED: &str = "consensus_reached";
    /// The user earned a badge.
    pub const BADGE_EARNED: &str = "badge_earned";
    /// The user's trust score changed.
    pub const TRUST_SCORE_UPDATE: &str = "trust_score_update";

    /// Lightweight signals meaning "unread content changed".
    pub const SIGNALS: [&str; 4] = [
        VALIDATION_RECEIVED,
        CONSENSUS_REACHED,
        BADGE_EARNED,
        TRUST_SCORE_UPDATE,
    ];
}

/// Callback invoked with the event payload.
pub type EventHandler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Identifies one registration; pass it back to [`EventBus::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

struct Listener {
    handle: ListenerHandle,
    handler: EventHandler,
}

/// Registry of named-event listeners.
#[derive(Default)]
pub struct EventBus {
    /// event name -> listeners in registration order
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
    next_handle: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`.
    pub fn on<F>(&self, event: &str, handler: F) -> ListenerHandle
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        listeners
            .entry(event.to_string())
            .or_default()
            .push(Listener {
                handle,
                handler: Arc::new(handler),
            });
        debug!("Registered listener {:?} for {}", handle, event);
        handle
    }

    /// Remove a previously registered handler. Unknown handles are ignored.
    pub fn off(&self, event: &str, handle: ListenerHandle) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(event_listeners) = listeners.get_mut(event) {
            event_listeners.retain(|listener| listener.handle != handle);
            if event_listeners.is_empty() {
                listeners.remove(event);
            }
        }
    }

    /// Register `handler` and return a guard that deregisters it on drop.
    pub fn subscribe<F>(self: &Arc<Self>, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handle = self.on(event, handler);
        Subscription {
            bus: Arc::downgrade(self),
            event: event.to_string(),
            handle: Some(handle),
        }
    }

    /// Deliver `payload` to every handler registered for `event`.
    ///
    /// Returns the number of handlers that completed successfully. The
    /// registry lock is released before handlers run, so handlers may
    /// register or deregister listeners themselves. A handler removed by an
    /// earlier one during the same emit is skipped; one added is not called
    /// until the next emit.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        let handlers: Vec<(ListenerHandle, EventHandler)> = {
            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match listeners.get(event) {
                Some(event_listeners) => event_listeners
                    .iter()
                    .map(|listener| (listener.handle, Arc::clone(&listener.handler)))
                    .collect(),
                None => {
                    debug!("No listeners for {}", event);
                    return 0;
                }
            }
        };

        let mut delivered = 0;
        for (handle, handler) in handlers {
            if !self.is_registered(event, handle) {
                debug!("Listener {:?} for {} removed during emit", handle, event);
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!("Listener {:?} for {} failed: {:#}", handle, event, e);
                }
                Err(_) => {
                    error!("Listener {:?} for {} panicked", handle, event);
                }
            }
        }
        delivered
    }

    fn is_registered(&self, event: &str, handle: ListenerHandle) -> bool {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .is_some_and(|listeners| listeners.iter().any(|l| l.handle == handle))
    }

    /// Number of handlers registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Total number of registered handlers across all events.
    pub fn total_listeners(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }
}

/// RAII registration returned by [`EventBus::subscribe`].
///
/// Holds the bus weakly: dropping the bus first is fine.
pub struct Subscription {
    bus: Weak<EventBus>,
    event: String,
    handle: Option<ListenerHandle>,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Deregister now instead of on drop.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let (Some(handle), Some(bus)) = (self.handle.take(), self.bus.upgrade()) {
            bus.off(&self.event, handle);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}
