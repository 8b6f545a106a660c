//! Gateway event handlers: listen, disconnect and notify.
//!
//! Every handler answers 200 with a human readable body on success and 500
//! with `"{context}: {json error}"` otherwise. Partial fan-out failure is a
//! success whose body carries the counts.

use std::collections::HashMap;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
};

use crate::error::{AppError, EventError};
use crate::extract::ListenRequest;
use crate::lifecycle::UnregisterReason;
use crate::metrics::HttpMetrics;
use crate::server::AppState;

/// Record the outcome of an event handler
fn observe<T>(event: &'static str, started: Instant, result: Result<T, EventError>) -> Result<T, EventError> {
    let status = if result.is_ok() { 200 } else { 500 };
    HttpMetrics::record_request(event, status, started.elapsed().as_secs_f64());
    result
}

/// POST /connections/{connection_id}/listen
#[tracing::instrument(name = "http.listen", skip(state, headers, query))]
pub async fn listen(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<String, EventError> {
    let started = Instant::now();
    let result = register(&state, &connection_id, &headers, &query).await;
    observe("listen", started, result)
}

async fn register(
    state: &AppState,
    connection_id: &str,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<String, EventError> {
    let failed = || format!("Failed while {} tried to start listening", connection_id);

    let services = state.services().map_err(|e| e.context(failed()))?;

    let client_id = services
        .extractor
        .extract(&ListenRequest { headers, query })
        .map_err(|e| AppError::from(e).context(failed()))?;

    services
        .lifecycle
        .register(connection_id, &client_id)
        .await
        .map_err(|e| {
            AppError::from(e).context(format!("{} for client {}", failed(), client_id))
        })?;

    Ok(format!(
        "{} began listening for client {}",
        connection_id, client_id
    ))
}

/// POST /connections/{connection_id}/disconnect and DELETE /connections/{connection_id}
#[tracing::instrument(name = "http.disconnect", skip(state))]
pub async fn disconnect(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> Result<String, EventError> {
    let started = Instant::now();
    let failed = || format!("Failed to disconnect {}", connection_id);

    let result = async {
        let services = state.services().map_err(|e| e.context(failed()))?;
        services
            .lifecycle
            .unregister(&connection_id, UnregisterReason::Disconnect)
            .await
            .map_err(|e| AppError::from(e).context(failed()))?;
        Ok::<_, EventError>(format!("Disconnected {}", connection_id))
    }
    .await;

    observe("disconnect", started, result)
}

/// POST /clients/{client_id}/notify
///
/// The raw request body is delivered to every listening connection as is.
#[tracing::instrument(name = "http.notify", skip(state, payload), fields(payload_len = payload.len()))]
pub async fn notify(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    payload: Bytes,
) -> Result<String, EventError> {
    let started = Instant::now();
    let failed = || format!("Failed to notify for {}", client_id);

    let result = async {
        let services = state.services().map_err(|e| e.context(failed()))?;
        let fanout = services
            .notifier
            .notify(&client_id, payload)
            .await
            .map_err(|e| AppError::from(e).context(failed()))?;
        Ok::<_, EventError>(format!("Notified for {}: {}", client_id, fanout.report()))
    }
    .await;

    observe("notify", started, result)
}
