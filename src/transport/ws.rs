//! WebSocket connection loop.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ConnectionState, PushMessage, ReconnectPolicy};
use crate::event_bus::EventBus;
use crate::metrics;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid push endpoint {url}: {message}")]
    InvalidEndpoint { url: String, message: String },

    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("push connection failed: {0}")]
    Stream(#[from] tungstenite::Error),
}

#[derive(Debug, Clone)]
struct Endpoint {
    url: String,
    auth_token: Option<String>,
    user_id: String,
}

/// Handle to the background connection task.
///
/// Dropping the handle stops the connection.
pub struct PushTransport {
    state: watch::Receiver<ConnectionState>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PushTransport {
    /// Start connecting to `url` and forwarding frames to `bus`.
    pub fn spawn(
        url: String,
        auth_token: Option<String>,
        user_id: String,
        policy: ReconnectPolicy,
        bus: Arc<EventBus>,
    ) -> Self {
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let token = CancellationToken::new();
        let endpoint = Endpoint {
            url,
            auth_token,
            user_id,
        };
        let handle = tokio::spawn(run(endpoint, policy, bus, state_tx, token.clone()));
        Self {
            state,
            token,
            handle: Some(handle),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Close the connection and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Push transport task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for PushTransport {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(
    endpoint: Endpoint,
    policy: ReconnectPolicy,
    bus: Arc<EventBus>,
    state: watch::Sender<ConnectionState>,
    token: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        state.send_replace(ConnectionState::Connecting);
        let result = tokio::select! {
            _ = token.cancelled() => break,
            result = connect_and_serve(&endpoint, &bus, &state, &mut attempt) => result,
        };

        state.send_replace(ConnectionState::Disconnected);
        metrics::set_push_connected(false);
        match result {
            Ok(()) => info!("Push connection closed by server"),
            Err(e) => warn!("Push connection lost: {}", e),
        }

        let delay = policy.backoff(attempt);
        attempt = attempt.saturating_add(1);
        debug!("Reconnecting push transport in {:?}", delay);
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    state.send_replace(ConnectionState::Stopped);
    metrics::set_push_connected(false);
    debug!("Push transport stopped");
}

/// One connection lifetime. Returns `Ok` when the server closed the
/// connection cleanly.
async fn connect_and_serve(
    endpoint: &Endpoint,
    bus: &EventBus,
    state: &watch::Sender<ConnectionState>,
    attempt: &mut u32,
) -> Result<(), TransportError> {
    let mut request = endpoint.url.as_str().into_client_request().map_err(|e| {
        TransportError::InvalidEndpoint {
            url: endpoint.url.clone(),
            message: e.to_string(),
        }
    })?;
    if let Some(token) = &endpoint.auth_token {
        let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
            TransportError::InvalidEndpoint {
                url: endpoint.url.clone(),
                message: e.to_string(),
            }
        })?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let connected = tokio_tungstenite::connect_async(request).await;
    metrics::record_push_reconnect(connected.is_ok());
    let (stream, _) = connected.map_err(|source| TransportError::Connect {
        url: endpoint.url.clone(),
        source,
    })?;
    let (mut write, mut read) = stream.split();

    let authenticate = PushMessage::authenticate(&endpoint.user_id);
    let frame = serde_json::to_string(&authenticate).unwrap_or_default();
    write.send(Message::text(frame)).await?;

    info!("Push transport connected to {}", endpoint.url);
    *attempt = 0;
    state.send_replace(ConnectionState::Connected);
    metrics::set_push_connected(true);

    while let Some(frame) = read.next().await {
        match frame? {
            // Pings are answered by tungstenite on the next read.
            Message::Text(text) => dispatch(bus, text.as_str()),
            Message::Close(frame) => {
                debug!("Push connection close frame: {:?}", frame);
                return Ok(());
            }
            _ => {}
        }
    }
    Ok(())
}

/// Forward one text frame to the bus by its `type`.
fn dispatch(bus: &EventBus, text: &str) {
    match serde_json::from_str::<PushMessage>(text) {
        Ok(message) => {
            metrics::record_push_event(&message.msg_type);
            let delivered = bus.emit(&message.msg_type, &message.payload);
            debug!(
                "Push event {} delivered to {} listeners",
                message.msg_type, delivered
            );
        }
        Err(e) => {
            warn!("Ignoring unparseable push frame: {}", e);
            metrics::record_push_dropped("unknown", "unparseable");
        }
    }
}
