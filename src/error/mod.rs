use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigurationError;
use crate::extract::ExtractionError;
use crate::lifecycle::LifecycleError;
use crate::notifier::NotifyError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigurationError),

    #[error("Client id error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Extraction(_) => "CLIENT_ID_ERROR",
            AppError::Lifecycle(_) => "REGISTRY_ERROR",
            AppError::Notify(_) => "REGISTRY_ERROR",
        }
    }

    /// Attach the human readable prefix of the response body
    pub fn context(self, context: impl Into<String>) -> EventError {
        EventError {
            context: context.into(),
            error: self,
        }
    }

    /// Message shown to the caller; backend details stay in the logs in production
    fn client_message(&self) -> String {
        if !is_production() {
            return self.to_string();
        }

        match self {
            AppError::Extraction(e) => e.to_string(),
            AppError::Config(_) => "Configuration error".to_string(),
            AppError::Lifecycle(_) | AppError::Notify(_) => {
                "Service temporarily unavailable".to_string()
            }
        }
    }

    fn body(&self) -> String {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code(),
                message: self.client_message(),
            },
        };
        serde_json::to_string(&body).unwrap_or_default()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

/// A failed gateway event: always a 500 whose body is
/// `"{context}: {json error}"`.
#[derive(Debug)]
pub struct EventError {
    context: String,
    error: AppError,
}

impl EventError {
    pub fn body(&self) -> String {
        format!("{}: {}", self.context, self.error.body())
    }
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.context, self.error)
    }
}

impl IntoResponse for EventError {
    fn into_response(self) -> Response {
        // Always log the detailed error server-side
        tracing::error!(
            code = %self.error.code(),
            context = %self.context,
            message = %self.error,
            "Event failed"
        );

        (StatusCode::INTERNAL_SERVER_ERROR, self.body()).into_response()
    }
}
