//! Notification data models

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Notification type enum
///
/// Types the backend may add later are kept as `Unknown` instead of
/// rejecting the whole record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ValidationReceived,
    ConsensusReached,
    ClaimValidated,
    ClaimRejected,
    BadgeEarned,
    TrustScoreUpdated,
    NewClaimNearby,
    DisputeRaised,
    ValidationCorrect,
    ValidationIncorrect,
    #[serde(other)]
    Unknown,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::ValidationReceived => "validation_received",
            NotificationType::ConsensusReached => "consensus_reached",
            NotificationType::ClaimValidated => "claim_validated",
            NotificationType::ClaimRejected => "claim_rejected",
            NotificationType::BadgeEarned => "badge_earned",
            NotificationType::TrustScoreUpdated => "trust_score_updated",
            NotificationType::NewClaimNearby => "new_claim_nearby",
            NotificationType::DisputeRaised => "dispute_raised",
            NotificationType::ValidationCorrect => "validation_correct",
            NotificationType::ValidationIncorrect => "validation_incorrect",
            NotificationType::Unknown => "unknown",
        }
    }
}

/// Notification priority. Declaration order is the sort order:
/// urgent < high < medium < low.
///
/// Unrecognized priorities deserialize as `Medium`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Urgent,
    High,
    #[default]
    Medium,
    Low,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Urgent => "urgent",
            NotificationPriority::High => "high",
            NotificationPriority::Medium => "medium",
            NotificationPriority::Low => "low",
        }
    }

    pub fn from_str_lossy(raw: &str) -> Self {
        match raw {
            "urgent" => NotificationPriority::Urgent,
            "high" => NotificationPriority::High,
            "low" => NotificationPriority::Low,
            _ => NotificationPriority::Medium,
        }
    }
}

impl<'de> Deserialize<'de> for NotificationPriority {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_str_lossy(&raw))
    }
}

/// A user notification as held by the client-side repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub priority: NotificationPriority,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Build a notification from a `new_notification` push payload.
    ///
    /// Push payloads are producer-shaped: unknown fields are ignored and
    /// missing optional fields get defaults. A missing `read` means "unread,
    /// just delivered", a missing `created_at` falls back to `received_at`.
    pub fn from_push_payload(
        payload: &serde_json::Value,
        received_at: DateTime<Utc>,
    ) -> Result<Self, PayloadError> {
        let raw: PushNotificationPayload = serde_json::from_value(payload.clone())
            .map_err(|e| PayloadError::Malformed(e.to_string()))?;

        let id = raw
            .id
            .filter(|id| !id.is_empty())
            .ok_or(PayloadError::MissingField("id"))?;
        let notification_type = raw.notification_type.ok_or(PayloadError::MissingField("type"))?;

        Ok(Notification {
            id,
            notification_type,
            title: raw.title.unwrap_or_default(),
            message: raw.message.unwrap_or_default(),
            priority: raw.priority.unwrap_or_default(),
            created_at: raw.created_at.unwrap_or(received_at),
            read: raw.read == Some(true),
            action_url: raw.action_url,
            claim_id: raw.claim_id,
            validation_id: raw.validation_id,
            badge_id: raw.badge_id,
            data: raw.data,
            read_at: raw.read_at,
        })
    }
}

/// Error for push payloads that cannot be turned into a [`Notification`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Lenient mirror of [`Notification`] used for push payloads.
#[derive(Debug, Default, Deserialize)]
struct PushNotificationPayload {
    id: Option<String>,
    #[serde(rename = "type")]
    notification_type: Option<NotificationType>,
    title: Option<String>,
    message: Option<String>,
    priority: Option<NotificationPriority>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    created_at: Option<DateTime<Utc>>,
    read: Option<bool>,
    action_url: Option<String>,
    claim_id: Option<String>,
    validation_id: Option<String>,
    badge_id: Option<String>,
    data: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    read_at: Option<DateTime<Utc>>,
}

/// Filter and paging parameters for the list endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationQuery {
    pub unread_only: bool,
    pub limit: u32,
    pub skip: u32,
    pub notification_type: Option<NotificationType>,
    pub priority: Option<NotificationPriority>,
}

impl NotificationQuery {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 100;

    /// First page of everything, newest first.
    pub fn recent(limit: u32) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            ..Default::default()
        }
    }

    /// Whether a response to this query covers the caller's whole list
    /// when it returned `returned` records.
    pub fn is_exhaustive(&self, returned: usize) -> bool {
        !self.unread_only
            && self.skip == 0
            && self.notification_type.is_none()
            && self.priority.is_none()
            && returned < self.limit as usize
    }

    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("unread_only", self.unread_only.to_string()),
            ("limit", self.limit.clamp(1, Self::MAX_LIMIT).to_string()),
            ("skip", self.skip.to_string()),
        ];
        if let Some(notification_type) = self.notification_type {
            pairs.push(("notification_type", notification_type.as_str().to_string()));
        }
        if let Some(priority) = self.priority {
            pairs.push(("priority", priority.as_str().to_string()));
        }
        pairs
    }
}

impl Default for NotificationQuery {
    fn default() -> Self {
        Self {
            unread_only: false,
            limit: Self::DEFAULT_LIMIT,
            skip: 0,
            notification_type: None,
            priority: None,
        }
    }
}

/// `{ "count": n }` body returned by count-style endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: usize,
}

/// Acknowledgement body returned by single-record mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_success() -> bool {
    true
}

/// Aggregate statistics over a user's notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationStats {
    pub total: usize,
    pub unread: usize,
    #[serde(default)]
    pub by_type: BTreeMap<String, usize>,
    #[serde(default)]
    pub by_priority: BTreeMap<String, usize>,
}

/// Per-user delivery preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPreferences {
    pub validation_received: bool,
    pub consensus_reached: bool,
    pub claim_validated: bool,
    pub claim_rejected: bool,
    pub badge_earned: bool,
    pub trust_score_updated: bool,
    pub new_claim_nearby: bool,
    pub dispute_raised: bool,
    pub validation_correct: bool,
    pub validation_incorrect: bool,
    pub in_app: bool,
    pub email: bool,
    pub push: bool,
    pub quiet_hours_enabled: bool,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            validation_received: true,
            consensus_reached: true,
            claim_validated: true,
            claim_rejected: true,
            badge_earned: true,
            trust_score_updated: true,
            new_claim_nearby: false,
            dispute_raised: true,
            validation_correct: true,
            validation_incorrect: true,
            in_app: true,
            email: false,
            push: false,
            quiet_hours_enabled: false,
            quiet_hours_start: None,
            quiet_hours_end: None,
        }
    }
}

impl NotificationPreferences {
    /// Whether the user wants to see notifications of this type.
    pub fn allows(&self, notification_type: NotificationType) -> bool {
        match notification_type {
            NotificationType::ValidationReceived => self.validation_received,
            NotificationType::ConsensusReached => self.consensus_reached,
            NotificationType::ClaimValidated => self.claim_validated,
            NotificationType::ClaimRejected => self.claim_rejected,
            NotificationType::BadgeEarned => self.badge_earned,
            NotificationType::TrustScoreUpdated => self.trust_score_updated,
            NotificationType::NewClaimNearby => self.new_claim_nearby,
            NotificationType::DisputeRaised => self.dispute_raised,
            NotificationType::ValidationCorrect => self.validation_correct,
            NotificationType::ValidationIncorrect => self.validation_incorrect,
            NotificationType::Unknown => true,
        }
    }
}

/// Partial preference update sent with PUT. Only present fields change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencesUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_received: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus_reached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_validated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_rejected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge_earned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_score_updated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_claim_nearby: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispute_raised: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_incorrect: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_app: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiet_hours_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiet_hours_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiet_hours_end: Option<String>,
}

impl PreferencesUpdate {
    /// Apply the present fields to `preferences`.
    pub fn apply_to(&self, preferences: &mut NotificationPreferences) {
        macro_rules! apply {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(value) = &self.$field {
                        preferences.$field = value.clone();
                    }
                )*
            };
        }
        apply!(
            validation_received,
            consensus_reached,
            claim_validated,
            claim_rejected,
            badge_earned,
            trust_score_updated,
            new_claim_nearby,
            dispute_raised,
            validation_correct,
            validation_incorrect,
            in_app,
            email,
            push,
            quiet_hours_enabled,
        );
        if let Some(start) = &self.quiet_hours_start {
            preferences.quiet_hours_start = Some(start.clone());
        }
        if let Some(end) = &self.quiet_hours_end {
            preferences.quiet_hours_end = Some(end.clone());
        }
    }
}

/// Timestamps arrive either as RFC 3339 or as naive ISO-8601 strings in UTC.
mod timestamp {
    use super::*;

    const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, NAIVE_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
        }
    }
}
