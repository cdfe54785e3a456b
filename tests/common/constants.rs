//! Shared constants for end-to-end tests
//!
//! When test data changes (user ids, tokens, timeouts), update only this
//! file.

// ============================================================================
// Test Session
// ============================================================================

/// Id of the logged-in test user
pub const TEST_USER_ID: &str = "user-1";

/// Bearer token the test session sends
pub const TEST_AUTH_TOKEN: &str = "test-token";

// ============================================================================
// Seeded Notification IDs
// ============================================================================

/// Unread validation notification (newest seeded)
pub const NOTIFICATION_VALIDATION_ID: &str = "n-3";

/// Read consensus notification
pub const NOTIFICATION_CONSENSUS_ID: &str = "n-2";

/// Unread badge notification (oldest seeded)
pub const NOTIFICATION_BADGE_ID: &str = "n-1";

/// Id used for notifications delivered by push during tests
pub const PUSHED_NOTIFICATION_ID: &str = "7";

// ============================================================================
// Timing
// ============================================================================

/// Maximum time to wait for the mock backend to accept requests
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Maximum time to wait for an expected state change
pub const STATE_CHANGE_TIMEOUT_MS: u64 = 5000;
