//! Merge function shared by the push and poll feeds.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::RefreshSignal;
use crate::event_bus::{events, EventBus, Subscription};
use crate::metrics;
use crate::notifications::{
    CountReconciliation, Notification, NotificationQuery, NotificationRepository, PayloadError,
};

/// What a `new_notification` push did to the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// First time this id was seen.
    Inserted,
    /// The id was already held and its record was replaced.
    Replaced,
}

/// Applies push deltas and poll snapshots to the repository.
///
/// Poll results are the authority for the unread counter and `read` flags.
/// Push records are the authority for low-latency arrival. Both feeds go
/// through `upsert` so a record seen on both is never counted twice.
pub struct ReconciliationEngine {
    repository: Arc<NotificationRepository>,
    refresh: RefreshSignal,
}

impl ReconciliationEngine {
    pub fn new(repository: Arc<NotificationRepository>, refresh: RefreshSignal) -> Self {
        Self {
            repository,
            refresh,
        }
    }

    pub fn repository(&self) -> &Arc<NotificationRepository> {
        &self.repository
    }

    /// Apply a `new_notification` push payload.
    ///
    /// Before the full list has been loaded the counter is an estimate and is
    /// bumped for records not already held. Once loaded, `upsert` derives the
    /// counter from the held records.
    pub fn apply_push_notification(&self, payload: &Value) -> Result<PushOutcome, PayloadError> {
        let notification = match Notification::from_push_payload(payload, Utc::now()) {
            Ok(notification) => notification,
            Err(e) => {
                let reason = match e {
                    PayloadError::MissingField(_) => "missing_field",
                    PayloadError::Malformed(_) => "malformed",
                };
                metrics::record_push_dropped(events::NEW_NOTIFICATION, reason);
                return Err(e);
            }
        };

        let id = notification.id.clone();
        let unread = !notification.read;
        if !self.repository.upsert(notification) {
            debug!("Push replaced already held notification {}", id);
            return Ok(PushOutcome::Replaced);
        }

        if unread && self.repository.increment_unread_estimate() {
            debug!("Push estimate bumped unread count for {}", id);
        }
        Ok(PushOutcome::Inserted)
    }

    /// A signal event arrived; the unread content changed server-side.
    pub fn apply_signal(&self, event: &str) {
        debug!("Signal {} received, requesting refresh", event);
        self.refresh.request();
    }

    /// Apply a list fetched with `query`.
    ///
    /// `issued_at` is the repository version observed before the request was
    /// sent. A list covering the caller's whole set replaces the snapshot and
    /// marks the repository loaded; anything else is merged as a page.
    pub fn apply_list(&self, query: &NotificationQuery, records: Vec<Notification>, issued_at: u64) {
        if query.is_exhaustive(records.len()) {
            debug!("Applying full snapshot of {} notifications", records.len());
            self.repository.replace_snapshot(records, issued_at);
        } else {
            let inserted = self.repository.merge_page(records, issued_at);
            debug!("Merged page, {} new notifications", inserted);
        }
    }

    /// Apply a server-reported unread count.
    pub fn apply_unread_count(&self, count: usize) -> CountReconciliation {
        let outcome = self.repository.set_server_unread_count(count);
        match outcome {
            CountReconciliation::Adopted { previous, current } if previous != current => {
                debug!("Unread count adjusted from {} to {}", previous, current);
            }
            CountReconciliation::Diverged { server, local } => {
                info!(
                    "Server reports {} unread, held list has {}; requesting full refresh",
                    server, local
                );
                self.refresh.request_full();
            }
            _ => {}
        }
        outcome
    }

    /// Register the push handlers on `bus`.
    ///
    /// The returned attachment keeps them registered; dropping it removes
    /// every handler.
    pub fn attach(self: &Arc<Self>, bus: &Arc<EventBus>) -> PushAttachment {
        let mut subscriptions = Vec::with_capacity(1 + events::SIGNALS.len());

        let engine = Arc::clone(self);
        subscriptions.push(bus.subscribe(events::NEW_NOTIFICATION, move |payload| {
            engine
                .apply_push_notification(payload)
                .map(|_| ())
                .map_err(|e| {
                    warn!("Dropping {} event: {}", events::NEW_NOTIFICATION, e);
                    anyhow::Error::from(e)
                })
        }));

        for event in events::SIGNALS {
            let engine = Arc::clone(self);
            subscriptions.push(bus.subscribe(event, move |_| {
                engine.apply_signal(event);
                Ok(())
            }));
        }

        PushAttachment { subscriptions }
    }
}

/// Push handlers registered by [`ReconciliationEngine::attach`].
pub struct PushAttachment {
    subscriptions: Vec<Subscription>,
}

impl PushAttachment {
    /// Events this attachment listens to.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(Subscription::event)
    }

    /// Remove every handler now.
    pub fn detach(self) {
        for subscription in self.subscriptions {
            subscription.unsubscribe();
        }
    }
}
