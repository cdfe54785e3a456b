//! In-memory notification repository.
//!
//! Holds the client-side view of a user's notifications and the unread
//! counter derived from it. Every feed (push, poll, commands) mutates the
//! repository through the operations defined here, so the counter rules live
//! in one place:
//!
//! - before a complete list has been loaded the counter is whatever the
//!   server last reported, adjusted by push estimates;
//! - once a complete list is loaded the counter is always recomputed from the
//!   held records;
//! - a server count that disagrees with a loaded list is adopted and the
//!   repository goes back to count-only mode until the next complete list.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

use super::models::{Notification, NotificationStats};

/// Newest first, then insertion order.
type OrderKey = (Reverse<DateTime<Utc>>, u64);

/// Snapshot of the repository published to change subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepositoryState {
    /// Incremented on every mutation.
    pub version: u64,
    pub unread_count: usize,
    pub total: usize,
    /// Whether a complete list has been loaded since the last reset.
    pub loaded: bool,
}

/// Result of reconciling a server-reported unread count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountReconciliation {
    /// The server value was adopted (count-only mode).
    Adopted { previous: usize, current: usize },
    /// The held list is complete and agrees with the server.
    Consistent,
    /// The held list was complete but the server disagrees. The server value
    /// is adopted, the repository drops back to count-only mode and needs a
    /// full refresh to be loaded again.
    Diverged { server: usize, local: usize },
}

#[derive(Debug)]
struct Entry {
    notification: Notification,
    /// Repository version of the last local mutation of this entry.
    touched_at: u64,
}

#[derive(Debug, Default)]
struct RepositoryInner {
    ordered: BTreeMap<OrderKey, Entry>,
    keys: HashMap<String, OrderKey>,
    next_seq: u64,
    unread_count: usize,
    loaded: bool,
    version: u64,
}

impl RepositoryInner {
    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn derived_unread(&self) -> usize {
        self.ordered
            .values()
            .filter(|entry| !entry.notification.read)
            .count()
    }

    fn recompute_if_loaded(&mut self) {
        if self.loaded {
            self.unread_count = self.derived_unread();
        }
    }

    fn get(&self, id: &str) -> Option<&Entry> {
        self.keys.get(id).and_then(|key| self.ordered.get(key))
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Entry> {
        let key = *self.keys.get(id)?;
        self.ordered.get_mut(&key)
    }

    /// Insert or replace by id. Returns true when the id was not held before.
    ///
    /// A replaced entry keeps its insertion sequence so ties on `created_at`
    /// stay stable across redeliveries.
    fn put(&mut self, notification: Notification, touched_at: u64) -> bool {
        let existing = self.keys.remove(&notification.id);
        let seq = match existing {
            Some(key) => {
                self.ordered.remove(&key);
                key.1
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                seq
            }
        };

        let key = (Reverse(notification.created_at), seq);
        self.keys.insert(notification.id.clone(), key);
        self.ordered.insert(
            key,
            Entry {
                notification,
                touched_at,
            },
        );
        existing.is_none()
    }

    fn take(&mut self, id: &str) -> Option<Entry> {
        let key = self.keys.remove(id)?;
        self.ordered.remove(&key)
    }

    fn state(&self) -> RepositoryState {
        RepositoryState {
            version: self.version,
            unread_count: self.unread_count,
            total: self.ordered.len(),
            loaded: self.loaded,
        }
    }
}

/// Client-side store of notifications and the unread counter.
///
/// Created empty at session start and reset at logout. The lock is only held
/// for the duration of a single operation and never across an `.await`.
pub struct NotificationRepository {
    inner: RwLock<RepositoryInner>,
    changes: watch::Sender<RepositoryState>,
}

impl Default for NotificationRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationRepository {
    /// Create an empty repository in count-only mode.
    pub fn new() -> Self {
        let (changes, _) = watch::channel(RepositoryState::default());
        Self {
            inner: RwLock::new(RepositoryInner::default()),
            changes,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RepositoryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RepositoryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: RepositoryState) {
        self.changes.send_replace(state);
    }

    /// Subscribe to repository changes.
    ///
    /// The receiver always holds the latest [`RepositoryState`]; UI
    /// collaborators re-read the list when it changes.
    pub fn subscribe(&self) -> watch::Receiver<RepositoryState> {
        self.changes.subscribe()
    }

    /// Current state without subscribing.
    pub fn state(&self) -> RepositoryState {
        self.read().state()
    }

    /// Current repository version. Feeds record it before suspending so they
    /// can tell what changed locally while they were waiting.
    pub fn version(&self) -> u64 {
        self.read().version
    }

    pub fn unread_count(&self) -> usize {
        self.read().unread_count
    }

    pub fn is_loaded(&self) -> bool {
        self.read().loaded
    }

    pub fn len(&self) -> usize {
        self.read().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().ordered.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().keys.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.read().get(id).map(|entry| entry.notification.clone())
    }

    /// Ordered slice: newest `created_at` first, insertion order on ties.
    pub fn notifications(&self, limit: usize, offset: usize) -> Vec<Notification> {
        self.read()
            .ordered
            .values()
            .skip(offset)
            .take(limit)
            .map(|entry| entry.notification.clone())
            .collect()
    }

    /// Every held notification, in list order.
    pub fn all(&self) -> Vec<Notification> {
        self.notifications(usize::MAX, 0)
    }

    /// Insert or replace by id. Returns true when the id was new.
    ///
    /// The counter is recomputed from the held set once the list is known to
    /// be complete; in count-only mode it is left to the caller.
    pub fn upsert(&self, notification: Notification) -> bool {
        let (inserted, state) = {
            let mut inner = self.write();
            let version = inner.bump();
            let inserted = inner.put(notification, version);
            inner.recompute_if_loaded();
            (inserted, inner.state())
        };
        self.publish(state);
        inserted
    }

    /// Bare increment used by the push feed before a complete list is loaded.
    /// Ignored once the counter is derived from held records.
    pub fn increment_unread_estimate(&self) -> bool {
        let state = {
            let mut inner = self.write();
            if inner.loaded {
                return false;
            }
            inner.bump();
            inner.unread_count += 1;
            inner.state()
        };
        self.publish(state);
        true
    }

    /// Mark one notification read. Returns true only on an unread → read
    /// transition; the counter moves by exactly one in that case.
    pub fn mark_read(&self, id: &str) -> bool {
        let state = {
            let mut inner = self.write();
            let now = Utc::now();
            let Some(entry) = inner.get_mut(id) else {
                return false;
            };
            if entry.notification.read {
                return false;
            }
            entry.notification.read = true;
            entry.notification.read_at.get_or_insert(now);

            let version = inner.bump();
            if let Some(entry) = inner.get_mut(id) {
                entry.touched_at = version;
            }
            inner.unread_count = inner.unread_count.saturating_sub(1);
            inner.state()
        };
        self.publish(state);
        true
    }

    /// Mark every held notification read and zero the counter.
    pub fn mark_all_read(&self) -> usize {
        let (changed, state) = {
            let mut inner = self.write();
            let version = inner.bump();
            let now = Utc::now();
            let mut changed = 0;
            for entry in inner.ordered.values_mut() {
                if !entry.notification.read {
                    entry.notification.read = true;
                    entry.notification.read_at.get_or_insert(now);
                    entry.touched_at = version;
                    changed += 1;
                }
            }
            inner.unread_count = 0;
            (changed, inner.state())
        };
        self.publish(state);
        changed
    }

    /// Remove one notification. Returns the removed record.
    pub fn remove(&self, id: &str) -> Option<Notification> {
        let (removed, state) = {
            let mut inner = self.write();
            let removed = inner.take(id)?;
            inner.bump();
            if inner.loaded {
                inner.unread_count = inner.derived_unread();
            } else if !removed.notification.read {
                inner.unread_count = inner.unread_count.saturating_sub(1);
            }
            (removed.notification, inner.state())
        };
        self.publish(state);
        Some(removed)
    }

    /// Remove every read notification. Returns how many were removed.
    pub fn remove_read(&self) -> usize {
        let (removed, state) = {
            let mut inner = self.write();
            let read_ids: Vec<String> = inner
                .ordered
                .values()
                .filter(|entry| entry.notification.read)
                .map(|entry| entry.notification.id.clone())
                .collect();
            for id in &read_ids {
                inner.take(id);
            }
            inner.bump();
            inner.recompute_if_loaded();
            (read_ids.len(), inner.state())
        };
        self.publish(state);
        removed
    }

    /// Apply a complete list fetched by the poll feed.
    ///
    /// `issued_at` is the repository version observed when the request was
    /// sent. Entries changed locally after that point are newer than the
    /// snapshot: they are kept (if missing from it) and keep their local
    /// state (if present in it). Everything else is replaced by the
    /// snapshot. Marks the list loaded and derives the counter.
    pub fn replace_snapshot(&self, snapshot: Vec<Notification>, issued_at: u64) {
        let state = {
            let mut inner = self.write();
            let version = inner.bump();

            let snapshot_ids: HashSet<String> =
                snapshot.iter().map(|n| n.id.clone()).collect();

            let stale_ids: Vec<String> = inner
                .ordered
                .values()
                .filter(|entry| {
                    !snapshot_ids.contains(&entry.notification.id) && entry.touched_at <= issued_at
                })
                .map(|entry| entry.notification.id.clone())
                .collect();
            for id in &stale_ids {
                inner.take(id);
            }

            // Server order is newest first, so equal timestamps keep the
            // server's relative order for records new to us.
            for notification in snapshot {
                let locally_newer = inner
                    .get(&notification.id)
                    .map(|entry| entry.touched_at > issued_at)
                    .unwrap_or(false);
                if locally_newer {
                    debug!(
                        "Keeping local state of {} over older snapshot",
                        notification.id
                    );
                    continue;
                }
                inner.put(notification, version);
            }

            inner.loaded = true;
            inner.unread_count = inner.derived_unread();
            inner.state()
        };
        self.publish(state);
    }

    /// Upsert a partial page (filtered, offset or truncated list).
    ///
    /// Records changed locally after `issued_at` keep their local state.
    pub fn merge_page(&self, page: Vec<Notification>, issued_at: u64) -> usize {
        let (inserted, state) = {
            let mut inner = self.write();
            let version = inner.bump();
            let mut inserted = 0;
            for notification in page {
                let locally_newer = inner
                    .get(&notification.id)
                    .map(|entry| entry.touched_at > issued_at)
                    .unwrap_or(false);
                if locally_newer {
                    continue;
                }
                if inner.put(notification, version) {
                    inserted += 1;
                }
            }
            inner.recompute_if_loaded();
            (inserted, inner.state())
        };
        self.publish(state);
        inserted
    }

    /// Reconcile a server-reported unread count.
    ///
    /// The server value is authoritative. In count-only mode it replaces any
    /// estimate. Once the list is loaded an agreeing count changes nothing;
    /// a disagreeing one means the held list is no longer complete, so it is
    /// adopted and the repository leaves loaded mode until the next full
    /// snapshot.
    pub fn set_server_unread_count(&self, count: usize) -> CountReconciliation {
        let (outcome, state) = {
            let mut inner = self.write();
            let previous = inner.unread_count;
            let outcome = if inner.loaded {
                if previous == count {
                    return CountReconciliation::Consistent;
                }
                inner.loaded = false;
                CountReconciliation::Diverged {
                    server: count,
                    local: previous,
                }
            } else {
                CountReconciliation::Adopted {
                    previous,
                    current: count,
                }
            };
            inner.bump();
            inner.unread_count = count;
            (outcome, inner.state())
        };
        self.publish(state);
        outcome
    }

    /// Aggregate statistics over the held records.
    pub fn stats(&self) -> NotificationStats {
        let inner = self.read();
        let mut stats = NotificationStats {
            total: inner.ordered.len(),
            unread: inner.unread_count,
            ..Default::default()
        };
        for entry in inner.ordered.values() {
            let notification = &entry.notification;
            *stats
                .by_type
                .entry(notification.notification_type.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .by_priority
                .entry(notification.priority.as_str().to_string())
                .or_insert(0) += 1;
        }
        stats
    }

    /// Drop everything (logout). The repository returns to count-only mode.
    pub fn reset(&self) {
        let state = {
            let mut inner = self.write();
            let version = inner.version + 1;
            *inner = RepositoryInner {
                version,
                ..Default::default()
            };
            inner.state()
        };
        self.publish(state);
    }
}
