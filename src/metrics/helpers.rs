use prometheus::{Encoder, TextEncoder};

use crate::delivery::DeliveryOutcome;
use crate::lifecycle::UnregisterReason;
use crate::notifier::FanoutResult;
use crate::redis::CircuitState;

use super::*;

/// Encode all registered metrics in the Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub struct RegistryMetrics;

impl RegistryMetrics {
    pub fn record_error(operation: &str) {
        REGISTRY_ERRORS_TOTAL.with_label_values(&[operation]).inc();
    }

    pub fn set_circuit_state(state: CircuitState) {
        REGISTRY_CIRCUIT_BREAKER_STATE.set(state.as_gauge());
    }

    pub fn set_connected(connected: bool) {
        REGISTRY_CONNECTION_STATUS.set(i64::from(connected));
    }
}

pub struct LifecycleMetrics;

impl LifecycleMetrics {
    pub fn record_registered() {
        CONNECTIONS_REGISTERED_TOTAL.inc();
    }

    pub fn record_unregistered(reason: UnregisterReason) {
        CONNECTIONS_UNREGISTERED_TOTAL
            .with_label_values(&[reason.as_str()])
            .inc();
    }
}

pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record_outcome(outcome: &DeliveryOutcome) {
        DELIVERIES_TOTAL.with_label_values(&[outcome.as_str()]).inc();
    }

    /// Record gateway round trip in seconds
    pub fn record_latency(seconds: f64) {
        DELIVERY_LATENCY.observe(seconds);
    }
}

pub struct NotifyMetrics;

impl NotifyMetrics {
    pub fn record_fanout(result: &FanoutResult) {
        NOTIFICATIONS_TOTAL.inc();
        FANOUT_TARGETS.observe(result.targeted as f64);
        if !result.is_complete() {
            NOTIFICATIONS_INCOMPLETE_TOTAL.inc();
        }
    }

    pub fn record_prune_failure() {
        PRUNE_FAILURES_TOTAL.inc();
    }
}

pub struct HttpMetrics;

impl HttpMetrics {
    /// Record a handled event and how long it took
    pub fn record_request(event: &str, status: u16, seconds: f64) {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&[event, &status.to_string()])
            .inc();
        HTTP_REQUEST_LATENCY
            .with_label_values(&[event])
            .observe(seconds);
    }
}
