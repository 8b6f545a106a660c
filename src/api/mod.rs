//! API layer - gateway event and operational endpoints.

mod events;
mod health;
mod metrics;
mod routes;

pub use events::{disconnect, listen, notify};
pub use health::{health, stats, HealthResponse, StatsResponse};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
