//! Sync status and lifecycle events.

use std::time::Duration;

use crate::transport::SyncStrategy;

/// Whether a sync is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
}

/// How far a sync has got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    pub loaded: usize,
    /// Expected total, unknown for priority syncs.
    pub total: Option<usize>,
    /// 0 to 100. Priority syncs count completed batches.
    pub percentage: u8,
}

impl SyncProgress {
    pub(crate) fn of_total(loaded: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            100
        } else {
            (loaded.saturating_mul(100) / total).min(100) as u8
        };
        Self {
            loaded,
            total: Some(total),
            percentage,
        }
    }

    pub(crate) fn of_batches(loaded: usize, done: usize, batches: usize) -> Self {
        let percentage = if batches == 0 {
            100
        } else {
            (done.saturating_mul(100) / batches).min(100) as u8
        };
        Self {
            loaded,
            total: None,
            percentage,
        }
    }
}

/// Something that happened during a sync.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Started {
        strategy: SyncStrategy,
        chat_id: Option<String>,
    },
    /// One priority batch finished.
    Batch {
        index: usize,
        count: usize,
        has_more: bool,
    },
    Progress(SyncProgress),
    Completed {
        strategy: SyncStrategy,
        count: usize,
        duration: Duration,
    },
    Error {
        code: &'static str,
        message: String,
        retryable: bool,
    },
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percentages() {
        assert_eq!(SyncProgress::of_total(5, 10).percentage, 50);
        assert_eq!(SyncProgress::of_total(0, 0).percentage, 100);
        assert_eq!(SyncProgress::of_total(12, 10).percentage, 100);

        let batch = SyncProgress::of_batches(30, 1, 3);
        assert_eq!(batch.total, None);
        assert_eq!(batch.percentage, 33);
    }
}
