//! Registration and removal of listening connections.

use std::sync::Arc;

use chrono::Duration;

use crate::metrics::LifecycleMetrics;
use crate::registry::{ConnectionRecord, ConnectionRegistry, RegistryError};

/// Why a connection left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterReason {
    /// The gateway reported the connection closed
    Disconnect,
    /// A delivery found the connection gone
    Stale,
}

impl UnregisterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnregisterReason::Disconnect => "disconnect",
            UnregisterReason::Stale => "stale",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Failed to register {connection_id} for client {client_id}: {source}")]
    Register {
        connection_id: String,
        client_id: String,
        #[source]
        source: RegistryError,
    },

    #[error("Failed to unregister {connection_id}: {source}")]
    Unregister {
        connection_id: String,
        #[source]
        source: RegistryError,
    },
}

/// Writes to the registry on behalf of listen and disconnect events.
///
/// Both operations are idempotent and never retried here; retry policy
/// belongs to whoever delivered the event.
pub struct LifecycleManager {
    registry: Arc<dyn ConnectionRegistry>,
    connection_ttl: Option<Duration>,
}

impl LifecycleManager {
    pub fn new(registry: Arc<dyn ConnectionRegistry>) -> Self {
        Self {
            registry,
            connection_ttl: None,
        }
    }

    /// Records registered from now on expire `ttl` after registration
    pub fn with_connection_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.connection_ttl = ttl;
        self
    }

    /// Start (or restart) listening. Last write wins.
    #[tracing::instrument(name = "lifecycle.register", skip(self))]
    pub async fn register(
        &self,
        connection_id: &str,
        client_id: &str,
    ) -> Result<ConnectionRecord, LifecycleError> {
        let mut record = ConnectionRecord::new(connection_id, client_id);
        if let Some(ttl) = self.connection_ttl {
            record = record.with_ttl(ttl);
        }

        self.registry
            .put(&record)
            .await
            .map_err(|source| LifecycleError::Register {
                connection_id: connection_id.to_string(),
                client_id: client_id.to_string(),
                source,
            })?;

        LifecycleMetrics::record_registered();
        tracing::info!(
            connection_id = %connection_id,
            client_id = %client_id,
            "Connection began listening"
        );

        Ok(record)
    }

    /// Stop listening. Unknown connections are not an error; the returned
    /// flag tells whether a record was actually removed.
    #[tracing::instrument(name = "lifecycle.unregister", skip(self, reason), fields(reason = reason.as_str()))]
    pub async fn unregister(
        &self,
        connection_id: &str,
        reason: UnregisterReason,
    ) -> Result<bool, LifecycleError> {
        let removed = self
            .registry
            .delete(connection_id)
            .await
            .map_err(|source| LifecycleError::Unregister {
                connection_id: connection_id.to_string(),
                source,
            })?;

        if removed {
            LifecycleMetrics::record_unregistered(reason);
            tracing::info!(
                connection_id = %connection_id,
                reason = reason.as_str(),
                "Connection stopped listening"
            );
        } else {
            tracing::debug!(
                connection_id = %connection_id,
                reason = reason.as_str(),
                "Connection was not registered"
            );
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryConnectionRegistry;

    fn manager() -> (Arc<MemoryConnectionRegistry>, LifecycleManager) {
        let registry = Arc::new(MemoryConnectionRegistry::new());
        let manager = LifecycleManager::new(registry.clone());
        (registry, manager)
    }

    #[tokio::test]
    async fn test_register_twice_keeps_one_record() {
        let (registry, manager) = manager();

        manager.register("c1", "user-42").await.unwrap();
        manager.register("c1", "user-42").await.unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.query_by_client("user-42").await.unwrap(), vec!["c1"]);
    }

    #[tokio::test]
    async fn test_register_last_write_wins() {
        let (registry, manager) = manager();

        manager.register("c1", "user-1").await.unwrap();
        manager.register("c1", "user-2").await.unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("c1").await.unwrap().unwrap().client_id, "user-2");
    }

    #[tokio::test]
    async fn test_unregister_absent_succeeds() {
        let (_, manager) = manager();
        let removed = manager
            .unregister("never-seen", UnregisterReason::Disconnect)
            .await
            .unwrap();
        assert!(!removed);
    }

    #[tokio::test]
    async fn test_unregister_removes_record() {
        let (registry, manager) = manager();
        manager.register("c1", "user-42").await.unwrap();

        let removed = manager
            .unregister("c1", UnregisterReason::Disconnect)
            .await
            .unwrap();

        assert!(removed);
        assert!(registry.is_empty());

        // A repeated disconnect finds nothing to remove
        let removed = manager
            .unregister("c1", UnregisterReason::Disconnect)
            .await
            .unwrap();
        assert!(!removed);
    }

    #[tokio::test]
    async fn test_ttl_sets_expiry() {
        let registry = Arc::new(MemoryConnectionRegistry::new());
        let manager =
            LifecycleManager::new(registry).with_connection_ttl(Some(Duration::hours(2)));

        let record = manager.register("c1", "user-42").await.unwrap();
        assert_eq!(
            record.expires_at.unwrap() - record.connected_at,
            Duration::hours(2)
        );
    }

    #[tokio::test]
    async fn test_register_with_unrepresentable_ttl() {
        let registry = Arc::new(MemoryConnectionRegistry::new());
        let ttl = Duration::try_seconds(10_000_000_000_000).unwrap();
        let manager = LifecycleManager::new(registry.clone()).with_connection_ttl(Some(ttl));

        let record = manager.register("c1", "user-42").await.unwrap();

        assert!(record.expires_at.is_none());
        assert_eq!(registry.query_by_client("user-42").await.unwrap(), vec!["c1"]);
    }
}
