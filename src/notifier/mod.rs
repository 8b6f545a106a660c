//! Fan-out of notifications to every connection listening for a client.
//!
//! - `FanoutNotifier`: concurrent bounded delivery with stale pruning
//! - `FanoutResult`: aggregate counts and per-connection failure details
//! - `NotifierStats`: running totals exposed by `/stats`

mod fanout;
mod result;

pub use fanout::{
    FanoutNotifier, NotifierStats, NotifierStatsSnapshot, NotifyError,
    DEFAULT_MAX_CONCURRENT_DELIVERIES,
};
pub use result::{FailedDelivery, FanoutResult};
