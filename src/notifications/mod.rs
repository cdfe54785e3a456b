//! User notifications module

mod models;
mod repository;

pub use models::{
    AckResponse, CountResponse, Notification, NotificationPreferences, NotificationPriority,
    NotificationQuery, NotificationStats, NotificationType, PayloadError, PreferencesUpdate,
};
pub use repository::{CountReconciliation, NotificationRepository, RepositoryState};
