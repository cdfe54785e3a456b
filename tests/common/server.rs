//! Mock notification backend
//!
//! Serves the `/api/notifications` REST surface and the `/api/ws` push
//! endpoint from in-memory state. Each test gets its own instance on a
//! random port.

use super::constants::*;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, patch},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use landclaim_notify::notifications::{
    Notification, NotificationPreferences, NotificationStats, PreferencesUpdate,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Default)]
pub struct MockState {
    /// Newest first.
    notifications: Mutex<Vec<Notification>>,
    preferences: Mutex<NotificationPreferences>,
    failing: AtomicBool,
    ws_clients: Mutex<Vec<mpsc::UnboundedSender<String>>>,
    client_messages: Mutex<Vec<Value>>,
    bearer_tokens: Mutex<Vec<String>>,
    pub list_requests: AtomicUsize,
    pub count_requests: AtomicUsize,
}

impl MockState {
    fn insert(&self, notification: Notification) {
        let mut notifications = self.notifications.lock().unwrap();
        notifications.retain(|n| n.id != notification.id);
        notifications.insert(0, notification);
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    fn record_token(&self, headers: &HeaderMap) {
        if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            self.bearer_tokens.lock().unwrap().push(value.to_string());
        }
    }

    fn unavailable(&self) -> Option<Response> {
        if self.failing.load(Ordering::SeqCst) {
            Some(
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"detail": "Service unavailable"})),
                )
                    .into_response(),
            )
        } else {
            None
        }
    }
}

/// Mock backend instance
///
/// When dropped, the server shuts down.
pub struct MockBackend {
    /// Base URL of the API (e.g., "http://127.0.0.1:12345/api")
    pub base_url: String,

    /// Push endpoint URL
    pub ws_url: String,

    pub state: Arc<MockState>,

    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockBackend {
    /// Spawns a mock backend seeded with `notifications`
    pub async fn spawn(notifications: Vec<Notification>) -> Self {
        let state = Arc::new(MockState::default());
        for notification in notifications.into_iter().rev() {
            state.insert(notification);
        }

        let app = Router::new()
            .route("/api/notifications/", get(list_notifications))
            .route("/api/notifications/unread", get(unread_count))
            .route("/api/notifications/stats", get(stats))
            .route("/api/notifications/mark-all-read", patch(mark_all_read))
            .route("/api/notifications/clear-all", delete(clear_read))
            .route(
                "/api/notifications/preferences",
                get(get_preferences).put(update_preferences),
            )
            .route("/api/notifications/{id}/read", patch(mark_read))
            .route("/api/notifications/{id}", delete(delete_notification))
            .route("/api/ws", get(ws_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url: format!("http://127.0.0.1:{}/api", port),
            ws_url: format!("ws://127.0.0.1:{}/api/ws", port),
            state,
            _shutdown_tx: Some(shutdown_tx),
        };
        server.wait_for_ready().await;
        server
    }

    async fn wait_for_ready(&self) {
        let client = reqwest::Client::new();
        let url = format!("{}/notifications/unread", self.base_url);
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(SERVER_READY_TIMEOUT_MS) {
            if client.get(&url).send().await.is_ok() {
                self.state.count_requests.store(0, Ordering::SeqCst);
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Mock backend did not become ready");
    }

    /// Adds (or replaces) a notification server-side without pushing it
    pub fn create(&self, notification: Notification) {
        self.state.insert(notification);
    }

    pub fn notification(&self, id: &str) -> Option<Notification> {
        self.state
            .notifications
            .lock()
            .unwrap()
            .iter()
            .find(|n| n.id == id)
            .cloned()
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Sends a `{"type", "payload"}` frame to every connected client.
    /// Returns how many clients received it.
    pub fn push(&self, event: &str, payload: Value) -> usize {
        let frame = json!({"type": event, "payload": payload}).to_string();
        let mut clients = self.state.ws_clients.lock().unwrap();
        clients.retain(|client| client.send(frame.clone()).is_ok());
        clients.len()
    }

    /// Sends a raw text frame to every connected client
    pub fn push_raw(&self, frame: &str) {
        let clients = self.state.ws_clients.lock().unwrap();
        for client in clients.iter() {
            let _ = client.send(frame.to_string());
        }
    }

    /// Closes every push connection
    pub fn disconnect_clients(&self) {
        self.state.ws_clients.lock().unwrap().clear();
    }

    /// Frames received from push clients, in arrival order
    pub fn client_messages(&self) -> Vec<Value> {
        self.state.client_messages.lock().unwrap().clone()
    }

    /// Authorization headers seen on list and push requests
    pub fn bearer_tokens(&self) -> Vec<String> {
        self.state.bearer_tokens.lock().unwrap().clone()
    }

    /// Waits until `count` clients have connected and authenticated since
    /// the server started
    pub async fn wait_for_authenticated_clients(&self, count: usize) {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(STATE_CHANGE_TIMEOUT_MS) {
            let authenticated = self
                .client_messages()
                .iter()
                .filter(|m| m["type"] == "authenticate")
                .count();
            if authenticated >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Expected {} authenticated push clients", count);
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.disconnect_clients();
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    unread_only: bool,
    limit: Option<usize>,
    #[serde(default)]
    skip: usize,
    notification_type: Option<String>,
}

async fn list_notifications(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Response {
    state.list_requests.fetch_add(1, Ordering::SeqCst);
    state.record_token(&headers);
    if let Some(response) = state.unavailable() {
        return response;
    }
    let limit = params.limit.unwrap_or(50).clamp(1, 100);
    let notifications: Vec<Notification> = state
        .notifications
        .lock()
        .unwrap()
        .iter()
        .filter(|n| !params.unread_only || !n.read)
        .filter(|n| {
            params
                .notification_type
                .as_deref()
                .map_or(true, |t| n.notification_type.as_str() == t)
        })
        .skip(params.skip)
        .take(limit)
        .cloned()
        .collect();
    Json(notifications).into_response()
}

async fn unread_count(State(state): State<Arc<MockState>>) -> Response {
    state.count_requests.fetch_add(1, Ordering::SeqCst);
    if let Some(response) = state.unavailable() {
        return response;
    }
    let count = state
        .notifications
        .lock()
        .unwrap()
        .iter()
        .filter(|n| !n.read)
        .count();
    Json(json!({ "count": count })).into_response()
}

async fn stats(State(state): State<Arc<MockState>>) -> Response {
    if let Some(response) = state.unavailable() {
        return response;
    }
    let notifications = state.notifications.lock().unwrap();
    let mut stats = NotificationStats {
        total: notifications.len(),
        unread: notifications.iter().filter(|n| !n.read).count(),
        ..Default::default()
    };
    for n in notifications.iter() {
        *stats
            .by_type
            .entry(n.notification_type.as_str().to_string())
            .or_insert(0) += 1;
        *stats
            .by_priority
            .entry(n.priority.as_str().to_string())
            .or_insert(0) += 1;
    }
    Json(stats).into_response()
}

async fn mark_read(State(state): State<Arc<MockState>>, Path(id): Path<String>) -> Response {
    if let Some(response) = state.unavailable() {
        return response;
    }
    let mut notifications = state.notifications.lock().unwrap();
    match notifications.iter_mut().find(|n| n.id == id) {
        Some(n) => {
            n.read = true;
            Json(json!({"success": true, "message": "Notification marked as read"})).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Notification not found"})),
        )
            .into_response(),
    }
}

async fn mark_all_read(State(state): State<Arc<MockState>>) -> Response {
    if let Some(response) = state.unavailable() {
        return response;
    }
    let mut notifications = state.notifications.lock().unwrap();
    let mut count = 0;
    for n in notifications.iter_mut().filter(|n| !n.read) {
        n.read = true;
        count += 1;
    }
    Json(json!({ "count": count })).into_response()
}

async fn delete_notification(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
) -> Response {
    if let Some(response) = state.unavailable() {
        return response;
    }
    let mut notifications = state.notifications.lock().unwrap();
    let before = notifications.len();
    notifications.retain(|n| n.id != id);
    if notifications.len() == before {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Notification not found"})),
        )
            .into_response();
    }
    Json(json!({"success": true, "message": "Notification deleted"})).into_response()
}

async fn clear_read(State(state): State<Arc<MockState>>) -> Response {
    if let Some(response) = state.unavailable() {
        return response;
    }
    let mut notifications = state.notifications.lock().unwrap();
    let before = notifications.len();
    notifications.retain(|n| !n.read);
    Json(json!({ "count": before - notifications.len() })).into_response()
}

async fn get_preferences(State(state): State<Arc<MockState>>) -> Response {
    if let Some(response) = state.unavailable() {
        return response;
    }
    let preferences = state.preferences.lock().unwrap().clone();
    Json(preferences).into_response()
}

async fn update_preferences(
    State(state): State<Arc<MockState>>,
    Json(update): Json<PreferencesUpdate>,
) -> Response {
    if let Some(response) = state.unavailable() {
        return response;
    }
    let mut preferences = state.preferences.lock().unwrap();
    update.apply_to(&mut preferences);
    Json(preferences.clone()).into_response()
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
) -> Response {
    state.record_token(&headers);
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<MockState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.ws_clients.lock().unwrap().push(tx);

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                        state.client_messages.lock().unwrap().push(value);
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
