//! Redis plumbing for the connection registry.
//!
//! - `RedisPool`: shared multiplexed connection guarded by a circuit breaker
//! - `CircuitBreaker`: fails registry calls fast while Redis is down
//! - `RedisHealth`: connection status reported by `/health` and `/metrics`

mod circuit_breaker;
mod health;
pub mod pool;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use health::{RedisHealth, RedisHealthStats, RedisHealthStatus};
pub use pool::{PoolError, RedisPool};

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
