use serde::Serialize;
use uuid::Uuid;

use crate::delivery::DeliveryError;

/// A connection the payload could not be delivered to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDelivery {
    pub connection_id: String,
    pub error: DeliveryError,
}

/// What a single fan-out did for each targeted connection
#[derive(Debug, Clone, Serialize)]
pub struct FanoutResult {
    pub notification_id: Uuid,
    pub client_id: String,
    /// Connections registered for the client when the fan-out started
    pub targeted: usize,
    pub delivered: usize,
    /// Connections the gateway reported gone
    pub stale: usize,
    /// Stale connections removed from the registry; lower than `stale` when
    /// pruning failed
    pub pruned: usize,
    pub failed: usize,
    pub failures: Vec<FailedDelivery>,
}

impl FanoutResult {
    pub(crate) fn new(notification_id: Uuid, client_id: &str, targeted: usize) -> Self {
        Self {
            notification_id,
            client_id: client_id.to_string(),
            targeted,
            delivered: 0,
            stale: 0,
            pruned: 0,
            failed: 0,
            failures: Vec::new(),
        }
    }

    /// No listener reported a non-stale failure
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    pub fn prune_failures(&self) -> usize {
        self.stale - self.pruned
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        format!(
            "targeted={} delivered={} stale={} pruned={} failed={}",
            self.targeted, self.delivered, self.stale, self.pruned, self.failed
        )
    }

    /// Summary followed by the per-connection failures as JSON, when any
    pub fn report(&self) -> String {
        if self.failures.is_empty() {
            return self.summary();
        }

        match serde_json::to_string(&self.failures) {
            Ok(failures) => format!("{} failures={}", self.summary(), failures),
            Err(_) => self.summary(),
        }
    }
}
