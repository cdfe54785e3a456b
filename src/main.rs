use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use landclaim_notify::config::{AppConfig, CliConfig, FileConfig};
use landclaim_notify::metrics;
use landclaim_notify::NotificationSession;

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the CLI arguments.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Base URL of the backend API (e.g., http://localhost:8000/api).
    #[clap(long)]
    pub backend_url: Option<String>,

    /// WebSocket URL of the push transport. Derived from the backend URL if omitted.
    #[clap(long)]
    pub ws_url: Option<String>,

    /// Bearer token of the logged-in user.
    #[clap(long)]
    pub auth_token: Option<String>,

    /// Id of the logged-in user.
    #[clap(long)]
    pub user_id: Option<String>,

    /// Timeout in seconds for backend requests.
    #[clap(long, default_value_t = 30)]
    pub request_timeout_sec: u64,

    /// Seconds between scheduled polls.
    #[clap(long, default_value_t = 30)]
    pub poll_interval_secs: u64,

    /// Number of notifications fetched per list poll.
    #[clap(long, default_value_t = 50)]
    pub page_size: u32,

    /// Disable the push transport and rely on polling only.
    #[clap(long)]
    pub no_push: bool,

    /// The port for the metrics server (Prometheus scraping). 0 disables it.
    #[clap(long, default_value_t = 0)]
    pub metrics_port: u16,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            backend_url: self.backend_url.clone(),
            ws_url: self.ws_url.clone(),
            auth_token: self.auth_token.clone(),
            user_id: self.user_id.clone(),
            request_timeout_sec: self.request_timeout_sec,
            poll_interval_secs: self.poll_interval_secs,
            page_size: self.page_size,
            push_enabled: !self.no_push,
            metrics_port: self.metrics_port,
        }
    }
}

async fn run_metrics_server(port: u16) -> Result<()> {
    let app = Router::new().route("/metrics", get(metrics::metrics_handler));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", port))?;
    info!("Metrics available at port {}!", port);
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();
    if config.metrics_port != 0 {
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(port).await {
                error!("Metrics server failed: {:#}", e);
            }
        });
    }

    info!("Connecting to {}...", config.backend_url);
    let session = NotificationSession::start(&config)?;

    let mut changes = session.commands().subscribe();
    let mut last_unread = None;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Ctrl-C received, shutting down");
                break;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *changes.borrow_and_update();
                if last_unread != Some(state.unread_count) {
                    info!(
                        "Unread notifications: {} ({} held, loaded: {})",
                        state.unread_count, state.total, state.loaded
                    );
                    last_unread = Some(state.unread_count);
                }
            }
        }
    }

    session.shutdown().await;
    Ok(())
}
