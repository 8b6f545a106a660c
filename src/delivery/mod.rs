//! Push delivery to a single gateway connection.
//!
//! The outcome of a delivery is a tagged value rather than a `Result`: a
//! connection that no longer exists is an expected answer from the gateway,
//! and the fan-out prunes it from the registry. Only transport failures and
//! unexpected statuses are errors.

mod http;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

pub use http::HttpDeliveryChannel;

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The gateway confirmed the connection is gone for good
    Stale,
    Failed(DeliveryError),
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Stale => "stale",
            DeliveryOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryError {
    #[error("Gateway responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Delivery timed out")]
    Timeout,

    #[error("Transport error: {message}")]
    Transport { message: String },
}

/// Push primitive of the gateway
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn deliver(&self, connection_id: &str, payload: Bytes) -> DeliveryOutcome;
}
