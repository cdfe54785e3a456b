//! HTTP client for the notification backend.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{BackendError, NotificationBackend};
use crate::notifications::{
    AckResponse, CountResponse, Notification, NotificationPreferences, NotificationQuery,
    NotificationStats, PreferencesUpdate,
};

/// Error body produced by the backend (`{"detail": "..."}`).
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

/// HTTP client for the `/notifications` REST surface.
pub struct HttpNotificationBackend {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpNotificationBackend {
    /// Create a new backend client.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the API (e.g., "http://localhost:8000/api")
    /// * `auth_token` - Bearer token of the logged-in user
    /// * `timeout_sec` - Request timeout in seconds
    pub fn new(
        base_url: String,
        auth_token: Option<String>,
        timeout_sec: u64,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create HTTP client")?;

        // Ensure base_url doesn't have trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    /// Get the base URL of the backend.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/notifications{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and turn non-success statuses into [`BackendError`].
    ///
    /// `record_id` maps a 404 to [`BackendError::NotFound`] for endpoints
    /// addressing a single notification.
    async fn send(
        &self,
        endpoint: &str,
        request: RequestBuilder,
        record_id: Option<&str>,
    ) -> Result<Response, BackendError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| BackendError::Transport {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::NOT_FOUND {
            if let Some(id) = record_id {
                return Err(BackendError::NotFound(id.to_string()));
            }
        }

        let detail = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.detail)
            .map(|detail| match detail {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            });

        debug!("{} failed with status {}: {:?}", endpoint, status, detail);
        Err(BackendError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            detail,
        })
    }

    async fn decode<T: DeserializeOwned>(
        endpoint: &str,
        response: Response,
    ) -> Result<T, BackendError> {
        response.json().await.map_err(|e| BackendError::Decode {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })
    }

    async fn ack(endpoint: &str, response: Response) -> Result<(), BackendError> {
        let ack: AckResponse = Self::decode(endpoint, response).await?;
        if ack.success {
            Ok(())
        } else {
            Err(BackendError::Rejected {
                endpoint: endpoint.to_string(),
                message: ack.message.unwrap_or_else(|| "no reason given".to_string()),
            })
        }
    }
}

#[async_trait]
impl NotificationBackend for HttpNotificationBackend {
    async fn list_notifications(
        &self,
        query: &NotificationQuery,
    ) -> Result<Vec<Notification>, BackendError> {
        const ENDPOINT: &str = "list_notifications";
        let request = self.client.get(self.url("/")).query(&query.to_query_pairs());
        let response = self.send(ENDPOINT, request, None).await?;
        Self::decode(ENDPOINT, response).await
    }

    async fn unread_count(&self) -> Result<usize, BackendError> {
        const ENDPOINT: &str = "unread_count";
        let response = self
            .send(ENDPOINT, self.client.get(self.url("/unread")), None)
            .await?;
        let body: CountResponse = Self::decode(ENDPOINT, response).await?;
        Ok(body.count)
    }

    async fn stats(&self) -> Result<NotificationStats, BackendError> {
        const ENDPOINT: &str = "stats";
        let response = self
            .send(ENDPOINT, self.client.get(self.url("/stats")), None)
            .await?;
        Self::decode(ENDPOINT, response).await
    }

    async fn mark_read(&self, id: &str) -> Result<(), BackendError> {
        const ENDPOINT: &str = "mark_read";
        let path = format!("/{}/read", urlencoding::encode(id));
        let response = self
            .send(ENDPOINT, self.client.patch(self.url(&path)), Some(id))
            .await?;
        Self::ack(ENDPOINT, response).await
    }

    async fn mark_all_read(&self) -> Result<usize, BackendError> {
        const ENDPOINT: &str = "mark_all_read";
        let response = self
            .send(ENDPOINT, self.client.patch(self.url("/mark-all-read")), None)
            .await?;
        let body: CountResponse = Self::decode(ENDPOINT, response).await?;
        Ok(body.count)
    }

    async fn delete_notification(&self, id: &str) -> Result<(), BackendError> {
        const ENDPOINT: &str = "delete_notification";
        let path = format!("/{}", urlencoding::encode(id));
        let response = self
            .send(ENDPOINT, self.client.delete(self.url(&path)), Some(id))
            .await?;
        Self::ack(ENDPOINT, response).await
    }

    async fn clear_read(&self) -> Result<usize, BackendError> {
        const ENDPOINT: &str = "clear_read";
        let response = self
            .send(ENDPOINT, self.client.delete(self.url("/clear-all")), None)
            .await?;
        let body: CountResponse = Self::decode(ENDPOINT, response).await?;
        Ok(body.count)
    }

    async fn preferences(&self) -> Result<NotificationPreferences, BackendError> {
        const ENDPOINT: &str = "preferences";
        let response = self
            .send(ENDPOINT, self.client.get(self.url("/preferences")), None)
            .await?;
        Self::decode(ENDPOINT, response).await
    }

    async fn update_preferences(
        &self,
        update: &PreferencesUpdate,
    ) -> Result<NotificationPreferences, BackendError> {
        const ENDPOINT: &str = "update_preferences";
        let request = self.client.put(self.url("/preferences")).json(update);
        let response = self.send(ENDPOINT, request, None).await?;
        Self::decode(ENDPOINT, response).await
    }
}
