//! Land-claims notification sync engine.
//!
//! Keeps a client-side view of a user's notifications and unread counter in
//! sync with the backend, fed by a WebSocket push transport and a REST
//! polling fallback.

pub mod backend;
pub mod commands;
pub mod config;
pub mod event_bus;
pub mod metrics;
pub mod notifications;
pub mod session;
pub mod sync;
pub mod transport;

// Re-export commonly used types for convenience
pub use backend::{BackendError, HttpNotificationBackend, NotificationBackend};
pub use commands::{CommandError, NotificationCommands};
pub use config::{AppConfig, CliConfig, FileConfig};
pub use event_bus::{EventBus, ListenerHandle, Subscription};
pub use notifications::{Notification, NotificationRepository, RepositoryState};
pub use session::NotificationSession;
