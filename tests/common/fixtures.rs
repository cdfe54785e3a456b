//! Test fixtures: seeded notifications and session configs

use super::constants::*;
use super::server::MockBackend;
use chrono::{Duration, Utc};
use landclaim_notify::config::{AppConfig, CliConfig, FileConfig};
use landclaim_notify::notifications::{Notification, NotificationPriority, NotificationType};
use std::io::Write;
use tempfile::NamedTempFile;

/// Builds a notification created `minutes_ago` minutes before now
pub fn make_notification(
    id: &str,
    notification_type: NotificationType,
    minutes_ago: i64,
    read: bool,
) -> Notification {
    Notification {
        id: id.to_string(),
        notification_type,
        title: format!("Notification {}", id),
        message: format!("Message for {}", id),
        priority: NotificationPriority::Medium,
        created_at: Utc::now() - Duration::minutes(minutes_ago),
        read,
        action_url: None,
        claim_id: Some("claim-1".to_string()),
        validation_id: None,
        badge_id: None,
        data: None,
        read_at: None,
    }
}

/// Three notifications, two of them unread, newest first
pub fn seeded_notifications() -> Vec<Notification> {
    vec![
        make_notification(
            NOTIFICATION_VALIDATION_ID,
            NotificationType::ValidationReceived,
            10,
            false,
        ),
        make_notification(
            NOTIFICATION_CONSENSUS_ID,
            NotificationType::ConsensusReached,
            20,
            true,
        ),
        make_notification(
            NOTIFICATION_BADGE_ID,
            NotificationType::BadgeEarned,
            30,
            false,
        ),
    ]
}

/// Session config pointing at `server`, loaded through a temporary TOML
/// file so the file layer is exercised too.
pub fn session_config(server: &MockBackend, poll_interval_secs: u64, push: bool) -> AppConfig {
    let mut file = NamedTempFile::new().expect("Failed to create config file");
    write!(
        file,
        r#"
backend_url = "{}"
auth_token = "{}"
request_timeout_sec = 5

[polling]
interval_secs = {}

[push]
enabled = {}
initial_backoff_ms = 50
max_backoff_ms = 200
"#,
        server.base_url, TEST_AUTH_TOKEN, poll_interval_secs, push
    )
    .expect("Failed to write config file");

    let file_config = FileConfig::load(file.path()).expect("Failed to load config file");
    let cli = CliConfig {
        user_id: Some(TEST_USER_ID.to_string()),
        ..Default::default()
    };
    AppConfig::resolve(&cli, Some(file_config)).expect("Failed to resolve config")
}
