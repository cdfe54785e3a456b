//! Per-login composition root.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::info;

use crate::backend::{HttpNotificationBackend, NotificationBackend};
use crate::commands::NotificationCommands;
use crate::config::AppConfig;
use crate::event_bus::EventBus;
use crate::metrics;
use crate::notifications::NotificationRepository;
use crate::sync::{
    PollFeed, PollingScheduler, PushAttachment, ReconciliationEngine, RefreshSignal,
};
use crate::transport::{ConnectionState, PushTransport};

/// Everything one logged-in user needs: repository, feeds and commands.
///
/// Created at login with [`start`](Self::start) and torn down at logout
/// with [`shutdown`](Self::shutdown).
pub struct NotificationSession {
    bus: Arc<EventBus>,
    repository: Arc<NotificationRepository>,
    scheduler: PollingScheduler,
    commands: NotificationCommands,
    attachment: Option<PushAttachment>,
    transport: Option<PushTransport>,
    gauge_task: JoinHandle<()>,
}

impl NotificationSession {
    /// Start a session against the HTTP backend described by `config`.
    pub fn start(config: &AppConfig) -> Result<Self> {
        let backend = HttpNotificationBackend::new(
            config.backend_url.clone(),
            config.auth_token.clone(),
            config.request_timeout_sec,
        )?;
        Ok(Self::start_with_backend(Arc::new(backend), config))
    }

    /// Start a session against any backend implementation.
    pub fn start_with_backend(backend: Arc<dyn NotificationBackend>, config: &AppConfig) -> Self {
        let bus = Arc::new(EventBus::new());
        let repository = Arc::new(NotificationRepository::new());
        let refresh = RefreshSignal::new();

        let engine = Arc::new(ReconciliationEngine::new(
            Arc::clone(&repository),
            refresh.clone(),
        ));
        let attachment = engine.attach(&bus);

        let feed = Arc::new(PollFeed::new(
            Arc::clone(&backend),
            Arc::clone(&engine),
            config.polling.page_size,
        ));
        let scheduler = PollingScheduler::new(Arc::clone(&feed), config.polling.interval, refresh);
        let commands = NotificationCommands::new(backend, feed, Arc::clone(&repository));

        let transport = config.push.enabled.then(|| {
            PushTransport::spawn(
                config.push.ws_url.clone(),
                config.auth_token.clone(),
                config.user_id.clone(),
                config.push.reconnect.clone(),
                Arc::clone(&bus),
            )
        });

        let gauge_task = spawn_unread_gauge(&repository);
        scheduler.start();
        info!(
            "Notification session started for user {} (push {})",
            config.user_id,
            if transport.is_some() { "enabled" } else { "disabled" }
        );

        Self {
            bus,
            repository,
            scheduler,
            commands,
            attachment: Some(attachment),
            transport,
            gauge_task,
        }
    }

    pub fn commands(&self) -> &NotificationCommands {
        &self.commands
    }

    pub fn scheduler(&self) -> &PollingScheduler {
        &self.scheduler
    }

    pub fn repository(&self) -> &Arc<NotificationRepository> {
        &self.repository
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Push connection state; `Stopped` when push is disabled.
    pub fn push_state(&self) -> ConnectionState {
        self.transport
            .as_ref()
            .map(PushTransport::state)
            .unwrap_or(ConnectionState::Stopped)
    }

    /// Logout: stop both feeds, drop the push handlers and clear the
    /// repository.
    pub async fn shutdown(mut self) {
        self.scheduler.stop();
        if let Some(transport) = self.transport.take() {
            transport.shutdown().await;
        }
        if let Some(attachment) = self.attachment.take() {
            attachment.detach();
        }
        self.repository.reset();
        self.gauge_task.abort();
        metrics::set_unread_count(0);
        info!("Notification session shut down");
    }
}

impl Drop for NotificationSession {
    fn drop(&mut self) {
        self.gauge_task.abort();
    }
}

fn spawn_unread_gauge(repository: &NotificationRepository) -> JoinHandle<()> {
    let mut changes = repository.subscribe();
    tokio::spawn(async move {
        loop {
            let unread = changes.borrow_and_update().unread_count;
            metrics::set_unread_count(unread);
            if changes.changed().await.is_err() {
                break;
            }
        }
    })
}
