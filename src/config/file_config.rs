use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub backend_url: Option<String>,
    pub ws_url: Option<String>,
    pub auth_token: Option<String>,
    pub user_id: Option<String>,
    pub request_timeout_sec: Option<u64>,
    pub metrics_port: Option<u16>,

    // Feature configs
    pub polling: Option<PollingConfig>,
    pub push: Option<PushConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: Option<u64>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PushConfig {
    pub enabled: Option<bool>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
