use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, Gauge, IntCounterVec, Opts, Registry, TextEncoder};

use crate::backend::BackendError;

/// Metric name prefix for all sync engine metrics
const PREFIX: &str = "landclaim_notify";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Push Feed Metrics
    pub static ref PUSH_EVENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_push_events_total"), "Push events received from the transport"),
        &["event"]
    ).expect("Failed to create push_events_total metric");

    pub static ref PUSH_EVENTS_DROPPED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_push_events_dropped_total"), "Push events dropped as malformed"),
        &["event", "reason"]
    ).expect("Failed to create push_events_dropped_total metric");

    pub static ref PUSH_CONNECTED: Gauge = Gauge::new(
        format!("{PREFIX}_push_connected"),
        "1 while the push transport is connected"
    ).expect("Failed to create push_connected metric");

    pub static ref PUSH_RECONNECTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_push_reconnects_total"), "Push transport reconnect attempts"),
        &["outcome"]
    ).expect("Failed to create push_reconnects_total metric");

    // Poll Feed Metrics
    pub static ref POLL_FETCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_poll_fetches_total"), "Poll fetches by kind and outcome"),
        &["kind", "outcome"]
    ).expect("Failed to create poll_fetches_total metric");

    // Command Metrics
    pub static ref COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_commands_total"), "Commands by name and outcome"),
        &["command", "outcome"]
    ).expect("Failed to create commands_total metric");

    // Repository Metrics
    pub static ref UNREAD_COUNT: Gauge = Gauge::new(
        format!("{PREFIX}_unread_count"),
        "Current unread notification count"
    ).expect("Failed to create unread_count metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(PUSH_EVENTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PUSH_EVENTS_DROPPED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PUSH_CONNECTED.clone()));
    let _ = REGISTRY.register(Box::new(PUSH_RECONNECTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(POLL_FETCHES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(COMMANDS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UNREAD_COUNT.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record a push event received from the transport
pub fn record_push_event(event: &str) {
    PUSH_EVENTS_TOTAL.with_label_values(&[event]).inc();
}

/// Record a push event dropped before reaching the repository
pub fn record_push_dropped(event: &str, reason: &str) {
    PUSH_EVENTS_DROPPED_TOTAL
        .with_label_values(&[event, reason])
        .inc();
}

/// Record the push transport connection state
pub fn set_push_connected(connected: bool) {
    PUSH_CONNECTED.set(if connected { 1.0 } else { 0.0 });
}

/// Record a reconnect attempt
pub fn record_push_reconnect(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    PUSH_RECONNECTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a poll fetch. `kind` is "list" or "count".
pub fn record_poll_fetch(kind: &str, result: Result<(), &BackendError>) {
    let outcome = match result {
        Ok(()) => "success",
        Err(e) => e.kind(),
    };
    POLL_FETCHES_TOTAL.with_label_values(&[kind, outcome]).inc();
}

/// Record a command outcome
pub fn record_command(command: &str, result: Result<(), &BackendError>) {
    let outcome = match result {
        Ok(()) => "success",
        Err(e) => e.kind(),
    };
    COMMANDS_TOTAL.with_label_values(&[command, outcome]).inc();
}

/// Update the unread count gauge
pub fn set_unread_count(count: usize) {
    UNREAD_COUNT.set(count as f64);
}

/// Handler for /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
