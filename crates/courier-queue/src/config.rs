//! Queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for an [`OfflineQueue`](crate::OfflineQueue).
///
/// Missing fields take their defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of items held at once.
    pub max_queue_size: usize,
    /// Retries after the first attempt before an item is marked failed.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay_ms: u64,
    /// Upper bound on any retry delay.
    pub max_delay_ms: u64,
    /// Items dispatched concurrently per pass.
    pub concurrency: usize,
    /// Tick interval of the processing loop while work remains.
    pub process_interval_ms: u64,
    /// Start the processing loop automatically once a processor is set.
    pub auto_process: bool,
    /// Expiry applied when `add` gets no ttl; zero means never.
    pub default_ttl_ms: u64,
    /// Key prefix for persisted items.
    pub storage_prefix: String,
    /// Buffered events per subscriber before it starts lagging.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            concurrency: 3,
            process_interval_ms: 1_000,
            auto_process: true,
            default_ttl_ms: 0,
            storage_prefix: "offline_queue:".to_string(),
            event_capacity: 256,
        }
    }
}

impl QueueConfig {
    /// The processing loop tick.
    pub fn process_interval(&self) -> Duration {
        Duration::from_millis(self.process_interval_ms)
    }
}
