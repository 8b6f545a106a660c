//! In-process registry backend

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::config::RegistryBackend;

use super::{ConnectionRecord, ConnectionRegistry, RegistryError};

/// Registry kept in process memory.
///
/// Only suitable when a single instance handles every event, since nothing is
/// shared between processes.
pub struct MemoryConnectionRegistry {
    /// connection_id -> record
    records: DashMap<String, ConnectionRecord>,
    /// client_id -> connection ids
    client_index: DashMap<String, HashSet<String>>,
}

impl MemoryConnectionRegistry {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            client_index: DashMap::new(),
        }
    }

    /// Number of stored records, expired ones included
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn unindex(&self, client_id: &str, connection_id: &str) {
        if let Some(mut conns) = self.client_index.get_mut(client_id) {
            conns.remove(connection_id);
            if conns.is_empty() {
                drop(conns);
                self.client_index
                    .remove_if(client_id, |_, conns| conns.is_empty());
            }
        }
    }

    fn remove_expired(&self, connection_id: &str) {
        let now = Utc::now();
        if let Some((_, record)) = self
            .records
            .remove_if(connection_id, |_, record| record.is_expired_at(now))
        {
            self.unindex(&record.client_id, connection_id);
            tracing::debug!(connection_id = %connection_id, "Dropped expired connection record");
        }
    }
}

impl Default for MemoryConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryConnectionRegistry {
    fn backend_type(&self) -> RegistryBackend {
        RegistryBackend::Memory
    }

    async fn put(&self, record: &ConnectionRecord) -> Result<(), RegistryError> {
        let previous = self
            .records
            .insert(record.connection_id.clone(), record.clone());

        if let Some(previous) = previous {
            if previous.client_id != record.client_id {
                self.unindex(&previous.client_id, &record.connection_id);
            }
        }

        self.client_index
            .entry(record.client_id.clone())
            .or_default()
            .insert(record.connection_id.clone());

        Ok(())
    }

    async fn delete(&self, connection_id: &str) -> Result<bool, RegistryError> {
        match self.records.remove(connection_id) {
            Some((_, record)) => {
                self.unindex(&record.client_id, connection_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, connection_id: &str) -> Result<Option<ConnectionRecord>, RegistryError> {
        let now = Utc::now();
        let record = self.records.get(connection_id).map(|r| r.value().clone());

        match record {
            Some(record) if record.is_expired_at(now) => {
                self.remove_expired(connection_id);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn query_by_client(&self, client_id: &str) -> Result<Vec<String>, RegistryError> {
        let candidates: Vec<String> = self
            .client_index
            .get(client_id)
            .map(|conns| conns.iter().cloned().collect())
            .unwrap_or_default();

        let now = Utc::now();
        let mut live = Vec::with_capacity(candidates.len());
        let mut expired = Vec::new();

        for connection_id in candidates {
            let is_live = self
                .records
                .get(&connection_id)
                .map(|r| r.client_id == client_id && !r.is_expired_at(now));

            match is_live {
                Some(true) => live.push(connection_id),
                Some(false) => expired.push(connection_id),
                None => self.unindex(client_id, &connection_id),
            }
        }

        for connection_id in expired {
            self.remove_expired(&connection_id);
        }

        Ok(live)
    }
}
