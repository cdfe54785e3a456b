mod file_config;

pub use file_config::{FileConfig, PollingConfig, PushConfig};

use anyhow::{bail, Result};
use std::time::Duration;

use crate::notifications::NotificationQuery;
use crate::transport::ReconnectPolicy;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub backend_url: Option<String>,
    pub ws_url: Option<String>,
    pub auth_token: Option<String>,
    pub user_id: Option<String>,
    pub request_timeout_sec: u64,
    pub poll_interval_secs: u64,
    pub page_size: u32,
    pub push_enabled: bool,
    pub metrics_port: u16,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            ws_url: None,
            auth_token: None,
            user_id: None,
            request_timeout_sec: 30,
            poll_interval_secs: 30,
            page_size: NotificationQuery::DEFAULT_LIMIT,
            push_enabled: true,
            metrics_port: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub backend_url: String,
    pub auth_token: Option<String>,
    pub user_id: String,
    pub request_timeout_sec: u64,
    /// 0 disables the metrics endpoint.
    pub metrics_port: u16,

    // Feature configs (with defaults)
    pub polling: PollingSettings,
    pub push: PushSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollingSettings {
    pub interval: Duration,
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushSettings {
    pub enabled: bool,
    pub ws_url: String,
    pub reconnect: ReconnectPolicy,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let backend_url = file
            .backend_url
            .or_else(|| cli.backend_url.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("backend_url must be specified via --backend-url or in config file")
            })?;
        if !backend_url.starts_with("http://") && !backend_url.starts_with("https://") {
            bail!("backend_url must be an http(s) URL: {}", backend_url);
        }
        let backend_url = backend_url.trim_end_matches('/').to_string();

        let user_id = file
            .user_id
            .or_else(|| cli.user_id.clone())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!("user_id must be specified via --user-id or in config file")
            })?;

        let auth_token = file.auth_token.or_else(|| cli.auth_token.clone());
        let request_timeout_sec = file.request_timeout_sec.unwrap_or(cli.request_timeout_sec);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let polling_file = file.polling.unwrap_or_default();
        let interval_secs = polling_file.interval_secs.unwrap_or(cli.poll_interval_secs);
        if interval_secs == 0 {
            bail!("Polling interval must be at least one second");
        }
        let page_size = polling_file.page_size.unwrap_or(cli.page_size);
        if page_size == 0 || page_size > NotificationQuery::MAX_LIMIT {
            bail!(
                "page_size must be between 1 and {}, got {}",
                NotificationQuery::MAX_LIMIT,
                page_size
            );
        }
        let polling = PollingSettings {
            interval: Duration::from_secs(interval_secs),
            page_size,
        };

        let push_file = file.push.unwrap_or_default();
        let defaults = ReconnectPolicy::default();
        let reconnect = ReconnectPolicy {
            initial_backoff_ms: push_file
                .initial_backoff_ms
                .unwrap_or(defaults.initial_backoff_ms),
            max_backoff_ms: push_file.max_backoff_ms.unwrap_or(defaults.max_backoff_ms),
            backoff_multiplier: push_file
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
        };
        if reconnect.backoff_multiplier < 1.0 {
            bail!(
                "backoff_multiplier must be at least 1.0, got {}",
                reconnect.backoff_multiplier
            );
        }
        let ws_url = file
            .ws_url
            .or_else(|| cli.ws_url.clone())
            .unwrap_or_else(|| default_ws_url(&backend_url));
        let push = PushSettings {
            enabled: push_file.enabled.unwrap_or(cli.push_enabled),
            ws_url,
            reconnect,
        };

        Ok(Self {
            backend_url,
            auth_token,
            user_id,
            request_timeout_sec,
            metrics_port,
            polling,
            push,
        })
    }
}

/// `http://host/api` -> `ws://host/api/ws`
fn default_ws_url(backend_url: &str) -> String {
    let base = if let Some(rest) = backend_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = backend_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        backend_url.to_string()
    };
    format!("{base}/ws")
}
