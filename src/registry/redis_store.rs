//! Redis-backed registry
//!
//! Layout under the configured table name:
//!
//! | Key | Type | Content |
//! |-----|------|---------|
//! | `{table}:conn:{connection_id}` | string | JSON `ConnectionRecord`, `EX` when the record expires |
//! | `{table}:client:{client_id}` | set | connection ids listening for the client |
//!
//! Index entries are not expired by Redis. `query_by_client` drops entries
//! whose record has gone (expired or moved to another client).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;

use crate::config::RegistryBackend;
use crate::metrics::RegistryMetrics;
use crate::redis::RedisPool;

use super::{ConnectionRecord, ConnectionRegistry, RegistryError};

pub struct RedisConnectionRegistry {
    pool: Arc<RedisPool>,
    table: String,
}

impl RedisConnectionRegistry {
    pub fn new(pool: Arc<RedisPool>, table: String) -> Self {
        Self { pool, table }
    }

    fn record_key(&self, connection_id: &str) -> String {
        format!("{}:conn:{}", self.table, connection_id)
    }

    fn client_key(&self, client_id: &str) -> String {
        format!("{}:client:{}", self.table, client_id)
    }

    fn decode(connection_id: &str, json: &str) -> Result<ConnectionRecord, RegistryError> {
        serde_json::from_str(json).map_err(|e| RegistryError::Corrupt {
            connection_id: connection_id.to_string(),
            reason: e.to_string(),
        })
    }

    async fn raw(&self, connection_id: &str) -> Result<Option<String>, RegistryError> {
        let key = self.record_key(connection_id);

        let json: Option<String> = self
            .pool
            .execute(move |mut conn| async move { conn.get(key).await })
            .await
            .inspect_err(|_| RegistryMetrics::record_error("get"))?;
        Ok(json)
    }

    /// Current value of a record as seen by a write to the same connection
    async fn stored(&self, connection_id: &str) -> Result<StoredRecord, RegistryError> {
        let json = self.raw(connection_id).await?;
        Ok(StoredRecord::classify(connection_id, json.as_deref(), Utc::now()))
    }

    /// Best-effort removal of dangling index entries
    async fn prune_index(&self, client_id: &str, connection_ids: Vec<String>) {
        let key = self.client_key(client_id);
        let count = connection_ids.len();

        let result = self
            .pool
            .execute(move |mut conn| async move {
                conn.srem::<_, _, ()>(key, connection_ids).await
            })
            .await;

        match result {
            Ok(()) => tracing::debug!(
                client_id = %client_id,
                removed = count,
                "Pruned dangling registry index entries"
            ),
            Err(e) => tracing::warn!(
                client_id = %client_id,
                error = %e,
                "Failed to prune registry index"
            ),
        }
    }
}

/// A stored record value, reduced to what `put` and `delete` act on.
///
/// Unreadable values (garbage, or records from an incompatible writer) never
/// block a write: `put` overwrites them and `delete` removes them.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StoredRecord {
    Absent,
    Owned { client_id: String },
    Unreadable,
}

impl StoredRecord {
    fn classify(connection_id: &str, json: Option<&str>, now: DateTime<Utc>) -> Self {
        let Some(json) = json else {
            return Self::Absent;
        };

        match RedisConnectionRegistry::decode(connection_id, json) {
            Ok(record) if record.is_expired_at(now) => Self::Absent,
            Ok(record) => Self::Owned {
                client_id: record.client_id,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Replacing unreadable registry record");
                Self::Unreadable
            }
        }
    }

    /// Client index a connection must leave when it is re-put for `client_id`
    fn index_to_leave(&self, client_id: &str) -> Option<&str> {
        match self {
            Self::Owned { client_id: previous } if previous != client_id => Some(previous),
            _ => None,
        }
    }
}

#[async_trait]
impl ConnectionRegistry for RedisConnectionRegistry {
    fn backend_type(&self) -> RegistryBackend {
        RegistryBackend::Redis
    }

    async fn put(&self, record: &ConnectionRecord) -> Result<(), RegistryError> {
        let json = serde_json::to_string(record).map_err(|e| RegistryError::Corrupt {
            connection_id: record.connection_id.clone(),
            reason: e.to_string(),
        })?;

        // Moving to another client must also leave the old client's index
        let moved_from = self
            .stored(&record.connection_id)
            .await?
            .index_to_leave(&record.client_id)
            .map(|previous| self.client_key(previous));

        let connection_id = record.connection_id.clone();
        let record_key = self.record_key(&record.connection_id);
        let client_key = self.client_key(&record.client_id);
        let ttl = record.remaining_ttl_seconds(Utc::now());

        self.pool
            .execute(move |mut conn| async move {
                let mut pipe = redis::pipe();
                pipe.atomic();
                if let Some(old_key) = moved_from {
                    pipe.srem(old_key, &connection_id).ignore();
                }
                if let Some(seconds) = ttl {
                    pipe.set_ex(&record_key, &json, seconds).ignore();
                } else {
                    pipe.set(&record_key, &json).ignore();
                }
                pipe.sadd(&client_key, &connection_id).ignore();

                let _: () = pipe.query_async(&mut conn).await?;
                Ok(())
            })
            .await
            .inspect_err(|_| RegistryMetrics::record_error("put"))?;

        Ok(())
    }

    async fn delete(&self, connection_id: &str) -> Result<bool, RegistryError> {
        // An unreadable record is still deleted; its index entry is left
        // for query_by_client to prune
        let client_key = match self.stored(connection_id).await? {
            StoredRecord::Absent => return Ok(false),
            StoredRecord::Owned { client_id } => Some(self.client_key(&client_id)),
            StoredRecord::Unreadable => None,
        };

        let member = connection_id.to_string();
        let record_key = self.record_key(connection_id);

        self.pool
            .execute(move |mut conn| async move {
                let mut pipe = redis::pipe();
                pipe.atomic().del(&record_key).ignore();
                if let Some(client_key) = client_key {
                    pipe.srem(&client_key, &member).ignore();
                }

                let _: () = pipe.query_async(&mut conn).await?;
                Ok(())
            })
            .await
            .inspect_err(|_| RegistryMetrics::record_error("delete"))?;

        Ok(true)
    }

    async fn get(&self, connection_id: &str) -> Result<Option<ConnectionRecord>, RegistryError> {
        let json = self.raw(connection_id).await?;

        json.map(|json| Self::decode(connection_id, &json))
            .transpose()
            .map(|record| record.filter(|r| !r.is_expired_at(Utc::now())))
    }

    async fn query_by_client(&self, client_id: &str) -> Result<Vec<String>, RegistryError> {
        let client_key = self.client_key(client_id);

        let members: Vec<String> = self
            .pool
            .execute(move |mut conn| async move { conn.smembers(client_key).await })
            .await
            .inspect_err(|_| RegistryMetrics::record_error("query"))?;

        if members.is_empty() {
            return Ok(members);
        }

        let record_keys: Vec<String> = members.iter().map(|id| self.record_key(id)).collect();
        let values: Vec<Option<String>> = self
            .pool
            .execute(move |mut conn| async move {
                redis::cmd("MGET").arg(&record_keys).query_async(&mut conn).await
            })
            .await
            .inspect_err(|_| RegistryMetrics::record_error("query"))?;

        let now = Utc::now();
        let mut live = Vec::with_capacity(members.len());
        let mut dangling = Vec::new();

        for (connection_id, value) in members.into_iter().zip(values) {
            let belongs = match value {
                Some(json) => match Self::decode(&connection_id, &json) {
                    Ok(record) => record.client_id == client_id && !record.is_expired_at(now),
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping unreadable registry record");
                        false
                    }
                },
                None => false,
            };

            if belongs {
                live.push(connection_id);
            } else {
                dangling.push(connection_id);
            }
        }

        if !dangling.is_empty() {
            self.prune_index(client_id, dangling).await;
        }

        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::{CircuitBreaker, RedisHealth};

    fn registry() -> RedisConnectionRegistry {
        let pool = RedisPool::new(
            "redis://localhost:6379",
            Arc::new(CircuitBreaker::new()),
            Arc::new(RedisHealth::new()),
        )
        .unwrap();
        RedisConnectionRegistry::new(Arc::new(pool), "connections".to_string())
    }

    #[test]
    fn test_key_layout() {
        let registry = registry();
        assert_eq!(registry.record_key("abc="), "connections:conn:abc=");
        assert_eq!(registry.client_key("user-42"), "connections:client:user-42");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = RedisConnectionRegistry::decode("c1", "{not json").unwrap_err();
        assert!(matches!(err, RegistryError::Corrupt { ref connection_id, .. } if connection_id == "c1"));
    }

    #[test]
    fn test_unreadable_record_does_not_block_writes() {
        let now = Utc::now();
        // Written by an older schema without `connected_at`
        let legacy = r#"{"connection_id":"c1","client_id":"user-42"}"#;

        for json in ["{bad", legacy] {
            let stored = StoredRecord::classify("c1", Some(json), now);
            assert_eq!(stored, StoredRecord::Unreadable);
            assert_eq!(stored.index_to_leave("user-7"), None);
        }
    }

    #[test]
    fn test_stored_record_classification() {
        let now = Utc::now();
        let record = ConnectionRecord::new("c1", "user-42");
        let json = serde_json::to_string(&record).unwrap();

        assert_eq!(StoredRecord::classify("c1", None, now), StoredRecord::Absent);

        let stored = StoredRecord::classify("c1", Some(&json), now);
        assert_eq!(
            stored,
            StoredRecord::Owned {
                client_id: "user-42".to_string()
            }
        );
        assert_eq!(stored.index_to_leave("user-7"), Some("user-42"));
        assert_eq!(stored.index_to_leave("user-42"), None);

        let expired = ConnectionRecord::new("c1", "user-42").with_ttl(chrono::Duration::seconds(1));
        let json = serde_json::to_string(&expired).unwrap();
        assert_eq!(
            StoredRecord::classify("c1", Some(&json), now + chrono::Duration::seconds(5)),
            StoredRecord::Absent
        );
    }

    #[test]
    fn test_decode_roundtrips_record() {
        let record = ConnectionRecord::new("c1", "user-42");
        let json = serde_json::to_string(&record).unwrap();

        let decoded = RedisConnectionRegistry::decode("c1", &json).unwrap();
        assert_eq!(decoded, record);
    }
}
