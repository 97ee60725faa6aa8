//! Cache invalidation signals — fire-and-forget, never fail the caller.
//!
//! The read cache that serves dashboards is out of scope; the engine only
//! publishes "this view is stale" tags on a channel. Whoever consumes them
//! (or nobody) is not the scheduler's problem: a closed channel is logged
//! at debug level and dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Named cache views the engine can invalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheTag {
    RunningSchedules,
    CombinedCustomerData,
}

impl CacheTag {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheTag::RunningSchedules => "running-schedules",
            CacheTag::CombinedCustomerData => "combined-customer-data",
        }
    }
}

impl std::fmt::Display for CacheTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publisher half of the invalidation channel.
#[derive(Debug, Clone)]
pub struct InvalidationBus {
    tx: mpsc::UnboundedSender<CacheTag>,
}

impl InvalidationBus {
    /// Create a bus plus the receiver a consumer can drain.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CacheTag>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Publish a tag. Failures are swallowed unconditionally.
    pub fn publish(&self, tag: CacheTag) {
        if self.tx.send(tag).is_err() {
            tracing::debug!("cache invalidation dropped (no consumer): {tag}");
        }
    }

    /// Publish the pair of tags every job mutation invalidates.
    pub fn publish_job_mutation(&self) {
        self.publish(CacheTag::RunningSchedules);
        self.publish(CacheTag::CombinedCustomerData);
    }
}

/// Drain the receiver and log each tag — the stand-in consumer used by the
/// CLI binary.
pub async fn run_invalidation_logger(mut rx: mpsc::UnboundedReceiver<CacheTag>) {
    while let Some(tag) = rx.recv().await {
        tracing::info!("♻️ cache invalidated: {tag}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_consumer() {
        let (bus, mut rx) = InvalidationBus::new();
        bus.publish_job_mutation();
        assert_eq!(rx.recv().await, Some(CacheTag::RunningSchedules));
        assert_eq!(rx.recv().await, Some(CacheTag::CombinedCustomerData));
    }

    #[tokio::test]
    async fn test_publish_without_consumer_is_swallowed() {
        let (bus, rx) = InvalidationBus::new();
        drop(rx);
        // Must not panic or error — invalidation never fails the caller.
        bus.publish(CacheTag::RunningSchedules);
        bus.publish_job_mutation();
    }
}
