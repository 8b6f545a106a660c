//! Health check and statistics endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::notifier::NotifierStatsSnapshot;
use crate::redis::{CircuitBreakerStats, RedisHealthStats};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    /// Why events are failing, when they are
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryHealthResponse>,
}

#[derive(Debug, Serialize)]
pub struct RegistryHealthResponse {
    pub backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerStats>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub notifications: NotifierStatsSnapshot,
}

/// GET /health
///
/// 503 while unconfigured or while the Redis registry is unreachable.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let uptime_seconds = state.started_at.elapsed().as_secs();

    let mut response = HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
        configuration_error: state.configuration_error().map(|e| e.to_string()),
        registry: None,
    };

    let services = match state.services() {
        Ok(services) => services,
        Err(_) => {
            response.status = "unconfigured";
            return (StatusCode::SERVICE_UNAVAILABLE, Json(response));
        }
    };

    let backend = services.registry.backend_type().as_str();
    let registry = match services.redis {
        Some(ref pool) => {
            // Probe only when no connection exists yet or it was dropped
            if !pool.is_healthy() {
                if let Err(e) = pool.ping().await {
                    tracing::warn!(error = %e, "Registry health probe failed");
                }
            }
            RegistryHealthResponse {
                backend,
                redis: Some(pool.health_stats()),
                circuit_breaker: Some(pool.circuit_stats()),
            }
        }
        None => RegistryHealthResponse {
            backend,
            redis: None,
            circuit_breaker: None,
        },
    };

    let healthy = services.redis.as_ref().map_or(true, |pool| pool.is_healthy());
    response.registry = Some(registry);

    if healthy {
        (StatusCode::OK, Json(response))
    } else {
        response.status = "degraded";
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let notifications = match state.services() {
        Ok(services) => services.notifier.stats(),
        Err(_) => NotifierStatsSnapshot::default(),
    };

    Json(StatsResponse {
        uptime_seconds: state.started_at.elapsed().as_secs(),
        notifications,
    })
}
