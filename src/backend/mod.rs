//! Notification backend REST surface.
//!
//! [`NotificationBackend`] is the seam between the sync engine and the
//! server: the poll feed and the command interface only talk to the backend
//! through it, so tests can substitute an in-memory implementation.

mod client;

pub use client::HttpNotificationBackend;

use async_trait::async_trait;
use thiserror::Error;

use crate::notifications::{
    Notification, NotificationPreferences, NotificationQuery, NotificationStats, PreferencesUpdate,
};

/// Errors returned by backend calls.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request never produced a response (connection refused, timeout...).
    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    /// The backend answered with a non-success status.
    #[error("{endpoint} returned status {status}{}", .detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    Status {
        endpoint: String,
        status: u16,
        detail: Option<String>,
    },

    /// The notification does not exist or does not belong to the user.
    #[error("notification {0} not found")]
    NotFound(String),

    /// The response body could not be decoded.
    #[error("failed to decode {endpoint} response: {message}")]
    Decode { endpoint: String, message: String },

    /// The backend acknowledged the request but reported it did not apply it.
    #[error("backend rejected {endpoint}: {message}")]
    Rejected { endpoint: String, message: String },
}

impl BackendError {
    /// Label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Transport { .. } => "transport",
            BackendError::Status { .. } => "status",
            BackendError::NotFound(_) => "not_found",
            BackendError::Decode { .. } => "decode",
            BackendError::Rejected { .. } => "rejected",
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Transport { .. } => true,
            BackendError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Operations the sync engine needs from the notification backend.
#[async_trait]
pub trait NotificationBackend: Send + Sync {
    /// List notifications, newest first.
    async fn list_notifications(
        &self,
        query: &NotificationQuery,
    ) -> Result<Vec<Notification>, BackendError>;

    /// Cheap unread counter used for the badge.
    async fn unread_count(&self) -> Result<usize, BackendError>;

    /// Aggregate statistics.
    async fn stats(&self) -> Result<NotificationStats, BackendError>;

    /// Mark one notification read.
    async fn mark_read(&self, id: &str) -> Result<(), BackendError>;

    /// Mark every notification read. Returns how many changed.
    async fn mark_all_read(&self) -> Result<usize, BackendError>;

    /// Delete one notification.
    async fn delete_notification(&self, id: &str) -> Result<(), BackendError>;

    /// Delete every read notification. Returns how many were removed.
    async fn clear_read(&self) -> Result<usize, BackendError>;

    /// Current delivery preferences (created with defaults server-side if missing).
    async fn preferences(&self) -> Result<NotificationPreferences, BackendError>;

    /// Apply a partial preference update and return the stored preferences.
    async fn update_preferences(
        &self,
        update: &PreferencesUpdate,
    ) -> Result<NotificationPreferences, BackendError>;
}
