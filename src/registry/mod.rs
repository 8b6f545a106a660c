//! Connection registry: which connections listen on behalf of which client.
//!
//! The registry is the only source of truth for listening connections. It is
//! keyed by connection id with a secondary index on client id, so a fan-out
//! can find every connection of a client in one lookup.
//!
//! Two backends implement [`ConnectionRegistry`]:
//!
//! - [`RedisConnectionRegistry`]: shared store for multi-instance deployments
//! - [`MemoryConnectionRegistry`]: single-process store for development and tests
//!
//! Both are treated as strongly consistent. If the store only offers eventual
//! consistency a notify racing a listen may miss the new connection; that race
//! is accepted.

mod memory;
mod redis_store;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigurationError, RegistryBackend, RequiredEndpoints};
use crate::redis::{PoolError, RedisPool};

pub use memory::MemoryConnectionRegistry;
pub use redis_store::RedisConnectionRegistry;

/// One listening connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub connection_id: String,
    pub client_id: String,
    pub connected_at: DateTime<Utc>,
    /// After this instant the record is treated as absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ConnectionRecord {
    pub fn new(connection_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            client_id: client_id.into(),
            connected_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Expire the record `ttl` after it was created. A TTL reaching past the
    /// representable range leaves the record without expiry.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = self.connected_at.checked_add_signed(ttl);
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whole seconds left before expiry, at least 1; `None` when the record
    /// never expires.
    pub fn remaining_ttl_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        self.expires_at
            .map(|at| (at - now).num_seconds().max(1) as u64)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Store rejected or failed the operation
    #[error("Registry backend error: {0}")]
    Backend(String),

    /// Circuit breaker is open; the store was not contacted
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record for connection {connection_id}: {reason}")]
    Corrupt {
        connection_id: String,
        reason: String,
    },
}

impl From<PoolError> for RegistryError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::CircuitOpen => RegistryError::Unavailable(err.to_string()),
            PoolError::Redis(e) => RegistryError::Backend(e.to_string()),
        }
    }
}

/// Typed access to the connection store
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    fn backend_type(&self) -> RegistryBackend;

    /// Insert or overwrite the record for `record.connection_id`.
    ///
    /// Re-registering under another client removes the connection from the
    /// old client's index.
    async fn put(&self, record: &ConnectionRecord) -> Result<(), RegistryError>;

    /// Remove a record. Returns whether one existed; absence is not an error.
    async fn delete(&self, connection_id: &str) -> Result<bool, RegistryError>;

    async fn get(&self, connection_id: &str) -> Result<Option<ConnectionRecord>, RegistryError>;

    /// All live connection ids listening for `client_id`, unordered and
    /// without duplicates. Empty means nobody is listening.
    async fn query_by_client(&self, client_id: &str) -> Result<Vec<String>, RegistryError>;
}

/// Build the registry selected by configuration.
///
/// The redis backend needs a pool; it is never silently replaced by the
/// in-memory store.
pub fn create_registry(
    endpoints: &RequiredEndpoints,
    redis_pool: Option<Arc<RedisPool>>,
) -> Result<Arc<dyn ConnectionRegistry>, ConfigurationError> {
    match endpoints.backend {
        RegistryBackend::Redis => {
            let pool = redis_pool.ok_or(ConfigurationError::Missing(vec!["REGISTRY__URL"]))?;
            tracing::info!(
                backend = "redis",
                table = %endpoints.registry_table,
                "Creating Redis connection registry"
            );
            Ok(Arc::new(RedisConnectionRegistry::new(
                pool,
                endpoints.registry_table.clone(),
            )))
        }
        RegistryBackend::Memory => {
            tracing::info!(backend = "memory", "Creating in-memory connection registry");
            Ok(Arc::new(MemoryConnectionRegistry::new()))
        }
    }
}
