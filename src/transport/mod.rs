//! Push transport.
//!
//! A WebSocket connection to the notification backend that forwards every
//! frame to the [`EventBus`](crate::event_bus::EventBus). The connection is
//! best effort: it reconnects with exponential backoff and the polling
//! scheduler keeps the repository accurate while it is down.

mod ws;

pub use ws::{PushTransport, TransportError};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Frame envelope used in both directions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushMessage {
    /// Event name (e.g., "new_notification", "badge_earned")
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl PushMessage {
    pub fn new(msg_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload,
        }
    }

    /// First frame sent after connecting.
    pub fn authenticate(user_id: &str) -> Self {
        Self::new(
            msg_types::AUTHENTICATE,
            serde_json::json!({ "user_id": user_id }),
        )
    }
}

/// Reserved frame types used by the transport itself.
pub mod msg_types {
    /// Client -> server, right after the connection opens.
    pub const AUTHENTICATE: &str = "authenticate";
}

/// Connection state published by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The transport was shut down and will not reconnect.
    Stopped,
}

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Cap for exponential growth, in milliseconds.
    pub max_backoff_ms: u64,
    /// Multiplier applied after each failed attempt.
    pub backoff_multiplier: f64,
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (0-based).
    ///
    /// `initial_backoff * multiplier^attempt`, capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let backoff = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = backoff.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}
