//! Prometheus metrics for the fan-out service.
//!
//! - Registry metrics (operation errors, circuit breaker state)
//! - Lifecycle metrics (registrations, removals by reason)
//! - Delivery metrics (outcomes, gateway latency)
//! - Fan-out metrics (notifications, per-notification target counts)

mod helpers;

pub use helpers::{
    encode_metrics, DeliveryMetrics, HttpMetrics, LifecycleMetrics, NotifyMetrics,
    RegistryMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "ara_fanout";

lazy_static! {
    // ============================================================================
    // Registry Metrics
    // ============================================================================

    /// Registry operation failures by operation
    pub static ref REGISTRY_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_registry_errors_total", METRIC_PREFIX),
        "Total connection registry operation errors",
        &["operation"]
    ).unwrap();

    /// Redis circuit breaker state (0=closed, 1=open, 2=half-open)
    pub static ref REGISTRY_CIRCUIT_BREAKER_STATE: IntGauge = register_int_gauge!(
        format!("{}_registry_circuit_breaker_state", METRIC_PREFIX),
        "Registry circuit breaker state (0=closed, 1=open, 2=half-open)"
    ).unwrap();

    /// Redis connection status (1 = connected, 0 = disconnected)
    pub static ref REGISTRY_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_registry_connection_status", METRIC_PREFIX),
        "Registry connection status (1=connected, 0=disconnected)"
    ).unwrap();

    // ============================================================================
    // Lifecycle Metrics
    // ============================================================================

    pub static ref CONNECTIONS_REGISTERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_registered_total", METRIC_PREFIX),
        "Total listen registrations"
    ).unwrap();

    /// Removals by reason (disconnect, stale)
    pub static ref CONNECTIONS_UNREGISTERED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_unregistered_total", METRIC_PREFIX),
        "Total connections removed from the registry",
        &["reason"]
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Delivery attempts by outcome (delivered, stale, failed)
    pub static ref DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Total delivery attempts by outcome",
        &["outcome"]
    ).unwrap();

    /// Gateway round trip per delivery
    pub static ref DELIVERY_LATENCY: Histogram = register_histogram!(
        format!("{}_delivery_latency_seconds", METRIC_PREFIX),
        "Gateway delivery latency in seconds",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    ).unwrap();

    // ============================================================================
    // Fan-out Metrics
    // ============================================================================

    pub static ref NOTIFICATIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_total", METRIC_PREFIX),
        "Total notifications fanned out"
    ).unwrap();

    /// Notifications with at least one failed delivery
    pub static ref NOTIFICATIONS_INCOMPLETE_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_incomplete_total", METRIC_PREFIX),
        "Total notifications with at least one failed delivery"
    ).unwrap();

    /// Listening connections per notification
    pub static ref FANOUT_TARGETS: Histogram = register_histogram!(
        format!("{}_fanout_targets", METRIC_PREFIX),
        "Number of connections targeted per notification",
        vec![0.0, 1.0, 2.0, 3.0, 5.0, 10.0, 25.0, 50.0, 100.0]
    ).unwrap();

    /// Stale connections that could not be removed
    pub static ref PRUNE_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_prune_failures_total", METRIC_PREFIX),
        "Total stale connections that could not be removed"
    ).unwrap();

    // ============================================================================
    // HTTP API Metrics
    // ============================================================================

    /// HTTP request counter by event and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_http_requests_total", METRIC_PREFIX),
        "Total HTTP requests",
        &["event", "status"]
    ).unwrap();

    /// Handler latency by event
    pub static ref HTTP_REQUEST_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_http_request_latency_seconds", METRIC_PREFIX),
        "HTTP request latency in seconds",
        &["event"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]
    ).unwrap();
}
