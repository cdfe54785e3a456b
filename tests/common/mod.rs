//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{seeded_notifications, session_config, MockBackend};
//! use landclaim_notify::NotificationSession;
//!
//! #[tokio::test]
//! async fn test_session_loads() {
//!     let server = MockBackend::spawn(seeded_notifications()).await;
//!     let session = NotificationSession::start(&session_config(&server, 30, true)).unwrap();
//!     // ...
//!     session.shutdown().await;
//! }
//! ```

#![allow(dead_code)]

mod constants;
mod fixtures;
mod server;

// Public API - this is what tests import
pub use constants::*;
pub use fixtures::{make_notification, seeded_notifications, session_config};
pub use server::MockBackend;

use std::time::Duration;

/// Polls `condition` until it holds, panicking with `what` after
/// [`STATE_CHANGE_TIMEOUT_MS`].
pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_millis(STATE_CHANGE_TIMEOUT_MS) {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Timed out waiting for {}", what);
}
