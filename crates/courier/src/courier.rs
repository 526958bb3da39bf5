//! The Courier: one handle over the offline queue and the sync manager.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use courier_core::{Clock, Payload, SystemClock};
use courier_queue::OfflineQueue;
use courier_store::{KvStore, LoadReport, SqliteKvStore};
use courier_sync::{SyncError, SyncManager, SyncResult, SyncTransport};

use crate::config::CourierConfig;
use crate::error::Result;

/// The client reliability layer.
///
/// Owns an [`OfflineQueue`] for outbound work and a [`SyncManager`] for
/// inbound history, both persisting into one [`KvStore`]. Constructed and
/// owned by the host; there is no global instance.
pub struct Courier<P: Payload, T: SyncTransport> {
    queue: OfflineQueue<P>,
    sync: SyncManager<T>,
    store: Arc<dyn KvStore>,
    config: CourierConfig,
}

impl<P: Payload, T: SyncTransport> Courier<P, T> {
    /// Create a new courier over `store`.
    pub fn new(store: Arc<dyn KvStore>, transport: T, config: CourierConfig) -> Self {
        Self::with_clock(store, transport, config, Arc::new(SystemClock))
    }

    /// Create a new courier with an explicit time source.
    pub fn with_clock(
        store: Arc<dyn KvStore>,
        transport: T,
        config: CourierConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let queue =
            OfflineQueue::with_clock(Arc::clone(&store), config.queue.clone(), Arc::clone(&clock));
        let sync = SyncManager::with_clock(transport, Arc::clone(&store), config.sync.clone(), clock);

        Self {
            queue,
            sync,
            store,
            config,
        }
    }

    /// Open a courier persisting to a SQLite database at `path`.
    pub fn open(path: impl AsRef<Path>, transport: T, config: CourierConfig) -> Result<Self> {
        let store = SqliteKvStore::open(path)?;
        Ok(Self::new(Arc::new(store), transport, config))
    }

    /// Get the outbound queue.
    pub fn queue(&self) -> &OfflineQueue<P> {
        &self.queue
    }

    /// Get the sync manager.
    pub fn sync(&self) -> &SyncManager<T> {
        &self.sync
    }

    /// Get the store reference.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Load the queue and start background work.
    pub async fn init(&self) -> Result<LoadReport> {
        let report = self.queue.init().await?;
        if self.config.auto_sync {
            self.sync.start_auto_sync(None);
        }
        info!(
            items = report.loaded,
            auto_sync = self.config.auto_sync,
            "courier initialized"
        );
        Ok(report)
    }

    /// Record a connectivity change.
    ///
    /// Coming back online wakes the queue and, with `sync_on_reconnect`,
    /// runs an incremental sync whose result is returned. A sync already in
    /// progress is left to finish and `None` is returned.
    pub async fn set_online(&self, online: bool) -> Result<Option<SyncResult<T::Item>>> {
        let was_online = self.queue.is_online();
        self.queue.set_online(online);

        if !online || was_online || !self.config.sync_on_reconnect {
            return Ok(None);
        }

        match self.sync.sync_incremental(None).await {
            Ok(result) => Ok(Some(result)),
            Err(SyncError::InProgress) => Ok(None),
            Err(e) => {
                warn!(error = %e, "reconnect sync failed");
                Err(e.into())
            }
        }
    }

    /// Stop auto sync, abort any running sync and stop queue processing.
    ///
    /// Idempotent. Queue items already handed to the processor finish.
    pub fn shutdown(&self) {
        self.sync.stop_auto_sync();
        self.sync.abort();
        self.queue.shutdown();
        info!("courier shut down");
    }
}
