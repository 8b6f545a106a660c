use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::server::AppState;

use super::events::{disconnect, listen, notify};
use super::health::{health, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Gateway events
        .route("/connections/{connection_id}/listen", post(listen))
        .route("/connections/{connection_id}/disconnect", post(disconnect))
        .route("/connections/{connection_id}", delete(disconnect))
        .route("/clients/{client_id}/notify", post(notify))
}
