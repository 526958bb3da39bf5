//! Sync configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use courier_store::DEFAULT_CURSOR_PREFIX;

/// Urgency tag sent with each priority batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPriority {
    High,
    Normal,
    Low,
}

/// One step of a priority sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityBatch {
    pub batch_size: usize,
    pub priority: BatchPriority,
    /// Wait before this batch starts.
    #[serde(default)]
    pub delay_ms: u64,
}

impl PriorityBatch {
    pub fn new(batch_size: usize, priority: BatchPriority, delay_ms: u64) -> Self {
        Self {
            batch_size,
            priority,
            delay_ms,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Configuration for a [`SyncManager`](crate::SyncManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Attempts per request, including the first.
    pub max_retries: u32,
    /// Linear backoff step: failure n waits `retry_delay_ms * n`.
    pub retry_delay_ms: u64,
    /// Page size when a sync names none.
    pub default_limit: usize,
    pub auto_sync_interval_ms: u64,
    pub include_deleted: bool,
    /// Steps of a priority sync, run in order.
    pub priority_batches: Vec<PriorityBatch>,
    pub cursor_prefix: String,
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1_000,
            default_limit: 50,
            auto_sync_interval_ms: 30_000,
            include_deleted: false,
            priority_batches: vec![
                PriorityBatch::new(20, BatchPriority::High, 0),
                PriorityBatch::new(50, BatchPriority::Normal, 500),
                PriorityBatch::new(100, BatchPriority::Low, 1_000),
            ],
            cursor_prefix: DEFAULT_CURSOR_PREFIX.to_string(),
            event_capacity: 64,
        }
    }
}

impl SyncConfig {
    pub fn auto_sync_interval(&self) -> Duration {
        Duration::from_millis(self.auto_sync_interval_ms)
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(u64::from(attempt)))
    }
}
