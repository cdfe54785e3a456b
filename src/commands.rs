//! Command interface used by UI collaborators.
//!
//! Mutations are confirm-then-apply: the backend call goes first and the
//! repository is only touched once it succeeded. A failed command leaves the
//! local state exactly as it was.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::backend::{BackendError, NotificationBackend};
use crate::metrics;
use crate::notifications::{
    Notification, NotificationPreferences, NotificationQuery, NotificationRepository,
    NotificationStats, PreferencesUpdate, RepositoryState,
};
use crate::sync::PollFeed;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("limit must be between 1 and {max}, got {0}", max = NotificationQuery::MAX_LIMIT)]
    InvalidLimit(usize),
}

impl CommandError {
    pub fn backend(&self) -> Option<&BackendError> {
        match self {
            CommandError::Backend(e) => Some(e),
            CommandError::InvalidLimit(_) => None,
        }
    }
}

pub struct NotificationCommands {
    backend: Arc<dyn NotificationBackend>,
    feed: Arc<PollFeed>,
    repository: Arc<NotificationRepository>,
}

impl NotificationCommands {
    pub fn new(
        backend: Arc<dyn NotificationBackend>,
        feed: Arc<PollFeed>,
        repository: Arc<NotificationRepository>,
    ) -> Self {
        Self {
            backend,
            feed,
            repository,
        }
    }

    /// Pull the newest `limit` notifications through the poll feed and
    /// return the reconciled slice.
    pub async fn fetch_recent(&self, limit: usize) -> Result<Vec<Notification>, CommandError> {
        if limit == 0 || limit > NotificationQuery::MAX_LIMIT as usize {
            return Err(CommandError::InvalidLimit(limit));
        }
        let query = NotificationQuery::recent(limit as u32);
        let result = self.feed.fetch_list(&query).await;
        metrics::record_command("fetch_recent", result.as_ref().map(|_| ()));
        result?;
        Ok(self.repository.notifications(limit, 0))
    }

    /// Mark one notification read.
    pub async fn mark_as_read(&self, id: &str) -> Result<(), CommandError> {
        let result = self.backend.mark_read(id).await;
        metrics::record_command("mark_as_read", result.as_ref().map(|_| ()));
        result?;

        if !self.repository.mark_read(id) {
            debug!("Notification {} was already read or not held", id);
        }
        Ok(())
    }

    /// Mark everything read. Returns the backend-reported number of changed
    /// notifications.
    pub async fn mark_all_as_read(&self) -> Result<usize, CommandError> {
        let result = self.backend.mark_all_read().await;
        metrics::record_command("mark_all_as_read", result.as_ref().map(|_| ()));
        let count = result?;

        let local = self.repository.mark_all_read();
        info!("Marked {} notifications read ({} held locally)", count, local);
        Ok(count)
    }

    pub async fn delete(&self, id: &str) -> Result<(), CommandError> {
        let result = self.backend.delete_notification(id).await;
        metrics::record_command("delete", result.as_ref().map(|_| ()));
        result?;

        self.repository.remove(id);
        Ok(())
    }

    /// Delete every read notification. Returns the backend-reported count.
    pub async fn clear_read(&self) -> Result<usize, CommandError> {
        let result = self.backend.clear_read().await;
        metrics::record_command("clear_read", result.as_ref().map(|_| ()));
        let count = result?;

        let local = self.repository.remove_read();
        debug!("Cleared {} read notifications ({} held locally)", count, local);
        Ok(count)
    }

    pub async fn preferences(&self) -> Result<NotificationPreferences, CommandError> {
        let result = self.backend.preferences().await;
        metrics::record_command("preferences", result.as_ref().map(|_| ()));
        Ok(result?)
    }

    pub async fn update_preferences(
        &self,
        update: &PreferencesUpdate,
    ) -> Result<NotificationPreferences, CommandError> {
        let result = self.backend.update_preferences(update).await;
        metrics::record_command("update_preferences", result.as_ref().map(|_| ()));
        Ok(result?)
    }

    /// Server-side statistics over every notification of the user.
    pub async fn stats(&self) -> Result<NotificationStats, CommandError> {
        let result = self.backend.stats().await;
        metrics::record_command("stats", result.as_ref().map(|_| ()));
        Ok(result?)
    }

    pub fn unread_count(&self) -> usize {
        self.repository.unread_count()
    }

    pub fn notifications(&self, limit: usize, offset: usize) -> Vec<Notification> {
        self.repository.notifications(limit, offset)
    }

    pub fn subscribe(&self) -> watch::Receiver<RepositoryState> {
        self.repository.subscribe()
    }
}
