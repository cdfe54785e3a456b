//! Reconciliation of the push and poll feeds into the repository.

mod poller;
mod reconciler;

pub use poller::{PollFeed, PollingScheduler, DEFAULT_POLL_INTERVAL};
pub use reconciler::{PushAttachment, PushOutcome, ReconciliationEngine};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Wakes the polling scheduler for an on-demand fetch.
///
/// Requests coalesce: several requests made before the scheduler wakes up
/// produce one fetch. A full request upgrades the pending fetch to a list
/// fetch.
#[derive(Clone, Default)]
pub struct RefreshSignal {
    inner: Arc<RefreshInner>,
}

#[derive(Default)]
struct RefreshInner {
    notify: Notify,
    full: AtomicBool,
}

impl RefreshSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a refresh of whatever the scheduler currently tracks.
    pub fn request(&self) {
        self.inner.notify.notify_one();
    }

    /// Ask for a refresh of the full list.
    pub fn request_full(&self) {
        self.inner.full.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    /// Wait for the next request. Returns whether a full list was asked for.
    pub(crate) async fn wait(&self) -> bool {
        self.inner.notify.notified().await;
        self.inner.full.swap(false, Ordering::SeqCst)
    }
}
