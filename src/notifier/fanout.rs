use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::delivery::{DeliveryChannel, DeliveryOutcome};
use crate::lifecycle::{LifecycleManager, UnregisterReason};
use crate::metrics::NotifyMetrics;
use crate::registry::{ConnectionRegistry, RegistryError};

use super::{FailedDelivery, FanoutResult};

/// Default bound on in-flight deliveries for one fan-out
pub const DEFAULT_MAX_CONCURRENT_DELIVERIES: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Listeners could not be looked up; nothing was delivered
    #[error("Failed to look up listeners for client {client_id}: {source}")]
    Lookup {
        client_id: String,
        #[source]
        source: RegistryError,
    },
}

/// Per-connection result before aggregation
enum ConnectionReport {
    Delivered,
    Stale { pruned: bool },
    Failed(FailedDelivery),
}

/// Running totals since process start
#[derive(Debug, Default)]
pub struct NotifierStats {
    pub notifications: AtomicU64,
    pub targeted: AtomicU64,
    pub delivered: AtomicU64,
    pub stale: AtomicU64,
    pub pruned: AtomicU64,
    pub failed: AtomicU64,
}

impl NotifierStats {
    fn record(&self, result: &FanoutResult) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
        self.targeted
            .fetch_add(result.targeted as u64, Ordering::Relaxed);
        self.delivered
            .fetch_add(result.delivered as u64, Ordering::Relaxed);
        self.stale.fetch_add(result.stale as u64, Ordering::Relaxed);
        self.pruned.fetch_add(result.pruned as u64, Ordering::Relaxed);
        self.failed.fetch_add(result.failed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NotifierStatsSnapshot {
        NotifierStatsSnapshot {
            notifications: self.notifications.load(Ordering::Relaxed),
            targeted: self.targeted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NotifierStatsSnapshot {
    pub notifications: u64,
    pub targeted: u64,
    pub delivered: u64,
    pub stale: u64,
    pub pruned: u64,
    pub failed: u64,
}

/// Delivers a payload to every connection listening for a client.
///
/// Deliveries run concurrently up to `max_concurrent` at a time and are
/// independent of each other: one slow or failing connection never holds
/// back the rest, and every target is attempted before the result is
/// returned. Connections the gateway reports gone are removed from the
/// registry on the way.
pub struct FanoutNotifier {
    registry: Arc<dyn ConnectionRegistry>,
    delivery: Arc<dyn DeliveryChannel>,
    lifecycle: Arc<LifecycleManager>,
    max_concurrent: usize,
    stats: NotifierStats,
}

impl FanoutNotifier {
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        delivery: Arc<dyn DeliveryChannel>,
        lifecycle: Arc<LifecycleManager>,
    ) -> Self {
        Self {
            registry,
            delivery,
            lifecycle,
            max_concurrent: DEFAULT_MAX_CONCURRENT_DELIVERIES,
            stats: NotifierStats::default(),
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn stats(&self) -> NotifierStatsSnapshot {
        self.stats.snapshot()
    }

    /// Fan `payload` out to all listeners of `client_id`.
    ///
    /// Only a failed listener lookup is an error. Per-connection failures are
    /// reported in the returned [`FanoutResult`]. Calling twice delivers twice.
    #[tracing::instrument(
        name = "notifier.notify",
        skip(self, payload),
        fields(payload_len = payload.len(), notification_id = tracing::field::Empty)
    )]
    pub async fn notify(&self, client_id: &str, payload: Bytes) -> Result<FanoutResult, NotifyError> {
        let notification_id = Uuid::new_v4();
        tracing::Span::current().record("notification_id", tracing::field::display(notification_id));

        let targets = self
            .registry
            .query_by_client(client_id)
            .await
            .map_err(|source| NotifyError::Lookup {
                client_id: client_id.to_string(),
                source,
            })?;

        let mut result = FanoutResult::new(notification_id, client_id, targets.len());

        if targets.is_empty() {
            tracing::debug!(client_id = %client_id, "Nobody is listening");
            self.finish(&result);
            return Ok(result);
        }

        let reports: Vec<ConnectionReport> = stream::iter(targets)
            .map(|connection_id| self.deliver_one(connection_id, payload.clone()))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for report in reports {
            match report {
                ConnectionReport::Delivered => result.delivered += 1,
                ConnectionReport::Stale { pruned } => {
                    result.stale += 1;
                    if pruned {
                        result.pruned += 1;
                    }
                }
                ConnectionReport::Failed(failure) => {
                    result.failed += 1;
                    result.failures.push(failure);
                }
            }
        }

        self.finish(&result);
        Ok(result)
    }

    async fn deliver_one(&self, connection_id: String, payload: Bytes) -> ConnectionReport {
        match self.delivery.deliver(&connection_id, payload).await {
            DeliveryOutcome::Delivered => ConnectionReport::Delivered,
            DeliveryOutcome::Stale => {
                tracing::info!(connection_id = %connection_id, "Found stale connection, removing");
                let pruned = self.prune(&connection_id).await;
                ConnectionReport::Stale { pruned }
            }
            DeliveryOutcome::Failed(error) => {
                tracing::warn!(connection_id = %connection_id, error = %error, "Delivery failed");
                ConnectionReport::Failed(FailedDelivery {
                    connection_id,
                    error,
                })
            }
        }
    }

    /// Remove a stale connection. A failure leaves the record for the next
    /// fan-out to find again, so it is logged rather than escalated.
    async fn prune(&self, connection_id: &str) -> bool {
        match self
            .lifecycle
            .unregister(connection_id, UnregisterReason::Stale)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                NotifyMetrics::record_prune_failure();
                tracing::error!(
                    connection_id = %connection_id,
                    error = %e,
                    "Failed to remove stale connection"
                );
                false
            }
        }
    }

    fn finish(&self, result: &FanoutResult) {
        self.stats.record(result);
        NotifyMetrics::record_fanout(result);

        tracing::info!(
            client_id = %result.client_id,
            notification_id = %result.notification_id,
            targeted = result.targeted,
            delivered = result.delivered,
            stale = result.stale,
            pruned = result.pruned,
            failed = result.failed,
            "Notification fanned out"
        );
    }
}
