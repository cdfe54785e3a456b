//! Polling fallback.
//!
//! [`PollFeed`] performs one fetch and hands the result to the
//! reconciliation engine. [`PollingScheduler`] drives it on a fixed interval
//! and on demand, whether or not the push transport is connected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ReconciliationEngine, RefreshSignal};
use crate::backend::{BackendError, NotificationBackend};
use crate::metrics;
use crate::notifications::{CountReconciliation, NotificationQuery};

/// Default interval between scheduled fetches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Pull side of the sync engine.
pub struct PollFeed {
    backend: Arc<dyn NotificationBackend>,
    engine: Arc<ReconciliationEngine>,
    page_size: u32,
}

impl PollFeed {
    pub fn new(
        backend: Arc<dyn NotificationBackend>,
        engine: Arc<ReconciliationEngine>,
        page_size: u32,
    ) -> Self {
        Self {
            backend,
            engine,
            page_size: page_size.clamp(1, NotificationQuery::MAX_LIMIT),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Fetch a list and reconcile it. Returns the number of records received.
    pub async fn fetch_list(&self, query: &NotificationQuery) -> Result<usize, BackendError> {
        // Anything the repository sees after this point is newer than the
        // response.
        let issued_at = self.engine.repository().version();
        let result = self.backend.list_notifications(query).await;
        metrics::record_poll_fetch("list", result.as_ref().map(|_| ()));

        let records = result?;
        let received = records.len();
        self.engine.apply_list(query, records, issued_at);
        Ok(received)
    }

    /// Fetch the first page, which is the full list for most users.
    pub async fn fetch_recent(&self) -> Result<usize, BackendError> {
        self.fetch_list(&NotificationQuery::recent(self.page_size))
            .await
    }

    /// Fetch the unread counter and reconcile it.
    pub async fn fetch_unread_count(&self) -> Result<CountReconciliation, BackendError> {
        let result = self.backend.unread_count().await;
        metrics::record_poll_fetch("count", result.as_ref().map(|_| ()));
        Ok(self.engine.apply_unread_count(result?))
    }

    /// One scheduled fetch. Failures are logged and swallowed.
    async fn poll(&self, full: bool) -> bool {
        let result = if full {
            self.fetch_recent().await.map(|received| {
                debug!("Poll received {} notifications", received);
            })
        } else {
            self.fetch_unread_count().await.map(|_| ())
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Notification poll ({}) failed: {}",
                    if full { "list" } else { "count" },
                    e
                );
                false
            }
        }
    }
}

/// Running scheduler task.
struct ActivePoll {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Fires [`PollFeed`] fetches on a fixed interval and on demand.
///
/// Idle until [`start`](Self::start); back to idle after
/// [`stop`](Self::stop) or when dropped.
pub struct PollingScheduler {
    feed: Arc<PollFeed>,
    interval: Duration,
    refresh: RefreshSignal,
    panel_open: Arc<AtomicBool>,
    active: Mutex<Option<ActivePoll>>,
}

impl PollingScheduler {
    pub fn new(feed: Arc<PollFeed>, interval: Duration, refresh: RefreshSignal) -> Self {
        Self {
            feed,
            interval,
            refresh,
            panel_open: Arc::new(AtomicBool::new(false)),
            active: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start polling: one immediate list fetch, then one fetch per interval.
    /// Calling it while active does nothing.
    pub fn start(&self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|poll| !poll.handle.is_finished()) {
            debug!("Polling scheduler already active");
            return;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_schedule(
            Arc::clone(&self.feed),
            self.interval,
            self.refresh.clone(),
            Arc::clone(&self.panel_open),
            token.clone(),
        ));
        info!("Polling scheduler started (interval {:?})", self.interval);
        *active = Some(ActivePoll { token, handle });
    }

    /// Stop polling. An in-flight fetch is abandoned.
    pub fn stop(&self) {
        let stopped = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(poll) = stopped {
            poll.token.cancel();
            info!("Polling scheduler stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|poll| !poll.handle.is_finished())
    }

    /// Fetch the full list now, outside the timer. The timer is not reset.
    pub async fn refresh_now(&self) -> Result<usize, BackendError> {
        self.feed.fetch_recent().await
    }

    /// Ask the running schedule for an extra fetch without waiting for it.
    pub fn request_refresh(&self) {
        self.refresh.request();
    }

    /// Track whether the notification panel is visible. While it is, every
    /// tick fetches the full list; otherwise only the unread counter.
    /// Opening the panel triggers a list fetch right away.
    pub fn set_panel_open(&self, open: bool) {
        let was_open = self.panel_open.swap(open, Ordering::SeqCst);
        if open && !was_open {
            self.refresh.request_full();
        }
    }

    pub fn is_panel_open(&self) -> bool {
        self.panel_open.load(Ordering::SeqCst)
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_schedule(
    feed: Arc<PollFeed>,
    period: Duration,
    refresh: RefreshSignal,
    panel_open: Arc<AtomicBool>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Until a list fetch succeeds every fetch is a list fetch.
    let mut list_pending = true;

    loop {
        let full = tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => list_pending || panel_open.load(Ordering::SeqCst),
            full = refresh.wait() => full || list_pending || panel_open.load(Ordering::SeqCst),
        };

        tokio::select! {
            _ = token.cancelled() => break,
            ok = feed.poll(full) => {
                if ok && full {
                    list_pending = false;
                }
            }
        }
    }
    debug!("Polling schedule exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NotificationRepository;
    use crate::sync::testing::{notification, FakeBackend};

    struct Harness {
        backend: Arc<FakeBackend>,
        repository: Arc<NotificationRepository>,
        scheduler: PollingScheduler,
    }

    fn harness(backend: FakeBackend) -> Harness {
        harness_with_page_size(backend, 50)
    }

    fn harness_with_page_size(backend: FakeBackend, page_size: u32) -> Harness {
        let backend = Arc::new(backend);
        let repository = Arc::new(NotificationRepository::new());
        let refresh = RefreshSignal::new();
        let engine = Arc::new(ReconciliationEngine::new(
            Arc::clone(&repository),
            refresh.clone(),
        ));
        let feed = Arc::new(PollFeed::new(backend.clone(), engine, page_size));
        let scheduler = PollingScheduler::new(feed, DEFAULT_POLL_INTERVAL, refresh);
        Harness {
            backend,
            repository,
            scheduler,
        }
    }

    fn three_with_two_unread() -> FakeBackend {
        FakeBackend::with(vec![
            notification("3", 3, false),
            notification("2", 2, true),
            notification("1", 1, false),
        ])
    }

    /// Let spawned tasks run without advancing the paused clock past a tick.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn calls(counter: &std::sync::atomic::AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_fetches_immediately() {
        let h = harness(three_with_two_unread());
        assert!(!h.scheduler.is_active());

        h.scheduler.start();
        settle().await;

        assert!(h.scheduler.is_active());
        assert_eq!(calls(&h.backend.list_calls), 1);
        assert_eq!(h.repository.unread_count(), 2);
        assert_eq!(h.repository.len(), 3);
        assert!(h.repository.is_loaded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_panel_ticks_fetch_count() {
        let h = harness(three_with_two_unread());
        h.scheduler.start();
        settle().await;

        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        assert_eq!(calls(&h.backend.list_calls), 1);
        assert_eq!(calls(&h.backend.count_calls), 1);

        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        assert_eq!(calls(&h.backend.count_calls), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_panel_ticks_fetch_list() {
        let h = harness(three_with_two_unread());
        h.scheduler.start();
        settle().await;

        h.scheduler.set_panel_open(true);
        settle().await;
        // Opening the panel fetches right away.
        assert_eq!(calls(&h.backend.list_calls), 2);

        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        assert_eq!(calls(&h.backend.list_calls), 3);
        assert_eq!(calls(&h.backend.count_calls), 0);
        assert!(h.scheduler.is_panel_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_the_timer() {
        let h = harness(three_with_two_unread());
        h.backend.set_failing(true);
        h.scheduler.start();
        settle().await;
        assert!(!h.repository.is_loaded());

        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        // The first list fetch failed, so the next tick retries the list.
        assert_eq!(calls(&h.backend.list_calls), 2);
        assert!(h.scheduler.is_active());

        h.backend.set_failing(false);
        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        assert!(h.repository.is_loaded());
        assert_eq!(h.repository.unread_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_timer() {
        let h = harness(three_with_two_unread());
        h.scheduler.start();
        settle().await;

        h.scheduler.stop();
        settle().await;
        assert!(!h.scheduler.is_active());

        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 3).await;
        settle().await;
        assert_eq!(calls(&h.backend.list_calls), 1);
        assert_eq!(calls(&h.backend.count_calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_timer() {
        let h = harness(three_with_two_unread());
        let backend = h.backend.clone();
        h.scheduler.start();
        settle().await;

        drop(h);
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 3).await;
        settle().await;
        assert_eq!(calls(&backend.list_calls), 1);
        assert_eq!(calls(&backend.count_calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_now_does_not_reset_timer() {
        let h = harness(three_with_two_unread());
        h.scheduler.start();
        settle().await;

        tokio::time::sleep(DEFAULT_POLL_INTERVAL / 2).await;
        h.backend.push(notification("7", 10, false));
        assert_eq!(h.scheduler.refresh_now().await.unwrap(), 4);
        assert_eq!(h.repository.unread_count(), 3);

        // The scheduled tick still fires at the original deadline.
        tokio::time::sleep(DEFAULT_POLL_INTERVAL / 2).await;
        settle().await;
        assert_eq!(calls(&h.backend.count_calls), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_tracks_count_without_push() {
        let h = harness(three_with_two_unread());
        h.scheduler.start();
        settle().await;
        assert_eq!(h.repository.unread_count(), 2);

        // New notification created server-side while push is down: the
        // count tick notices the divergence and pulls the list.
        h.backend.push(notification("7", 10, false));
        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        settle().await;

        assert_eq!(h.repository.unread_count(), 3);
        assert_eq!(h.repository.notifications(1, 0)[0].id, "7");
        assert_eq!(calls(&h.backend.list_calls), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_adopts_server_count_beyond_one_page() {
        let h = harness_with_page_size(FakeBackend::with(vec![notification("1", 1, false)]), 2);
        h.scheduler.start();
        settle().await;
        assert!(h.repository.is_loaded());
        assert_eq!(h.repository.unread_count(), 1);

        for (id, minute) in [("2", 2), ("3", 3), ("4", 4)] {
            h.backend.push(notification(id, minute, false));
        }
        for _ in 0..5 {
            tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
            settle().await;
        }

        // The first page no longer covers everything, so the server count
        // stays in charge.
        assert_eq!(h.repository.unread_count(), 4);
        assert!(!h.repository.is_loaded());
        assert_eq!(h.repository.notifications(1, 0)[0].id, "4");
        assert_eq!(h.repository.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_refresh_wakes_schedule() {
        let h = harness(three_with_two_unread());
        h.scheduler.start();
        settle().await;

        h.scheduler.request_refresh();
        settle().await;
        assert_eq!(calls(&h.backend.count_calls), 1);
        assert_eq!(calls(&h.backend.list_calls), 1);
    }
}
