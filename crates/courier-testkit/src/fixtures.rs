//! Test fixtures and helpers.

use std::sync::Arc;

use courier_core::{ChatAction, ManualClock};
use courier_queue::{OfflineQueue, QueueConfig};
use courier_store::MemoryKvStore;
use courier_sync::{SyncConfig, SyncManager, SyncTransport};

/// Start time of every fixture clock (Unix ms).
pub const FIXTURE_EPOCH: i64 = 1_700_000_000_000;

/// An in-memory store and a manual clock shared by everything built from it.
pub struct TestFixture {
    pub kv: Arc<MemoryKvStore>,
    pub clock: Arc<ManualClock>,
}

impl TestFixture {
    /// Create a new fixture with an empty store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryKvStore::new()))
    }

    /// Create a fixture over an existing store, e.g. to simulate a restart.
    pub fn with_store(kv: Arc<MemoryKvStore>) -> Self {
        Self {
            kv,
            clock: Arc::new(ManualClock::new(FIXTURE_EPOCH)),
        }
    }

    /// A queue over the fixture store and clock. Not yet initialized.
    pub fn queue(&self, config: QueueConfig) -> OfflineQueue<ChatAction> {
        OfflineQueue::with_clock(self.kv.clone(), config, self.clock.clone())
    }

    /// A sync manager over the fixture store and clock.
    pub fn sync_manager<T: SyncTransport>(&self, transport: T, config: SyncConfig) -> SyncManager<T> {
        SyncManager::with_clock(transport, self.kv.clone(), config, self.clock.clone())
    }

    /// Queue config for driving dispatch by hand: no background loop and no
    /// backoff wait.
    pub fn manual_queue_config() -> QueueConfig {
        QueueConfig {
            auto_process: false,
            base_delay_ms: 0,
            ..QueueConfig::default()
        }
    }

    /// Sync config with short retry delays.
    pub fn fast_sync_config() -> SyncConfig {
        SyncConfig {
            retry_delay_ms: 10,
            ..SyncConfig::default()
        }
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A `SendMessage` action.
pub fn send_message(chat_id: &str, content: &str) -> ChatAction {
    ChatAction::SendMessage {
        chat_id: chat_id.to_string(),
        content: content.to_string(),
        reply_to: None,
    }
}
