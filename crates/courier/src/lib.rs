//! # Courier
//!
//! The client-side reliability layer of a chat application: outbound actions
//! survive disconnects and restarts, and local state is reconciled with the
//! remote history through resumable, cursor-based sync.
//!
//! ## Overview
//!
//! - [`OfflineQueue`] persists outbound actions, dispatches them in priority
//!   order through a [`Processor`], and retries failures with exponential
//!   backoff.
//! - [`SyncManager`] runs incremental, full and priority syncs through a
//!   [`SyncTransport`] and keeps per-scope cursors current.
//! - [`Courier`] owns both over a single [`KvStore`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use courier::{ChatAction, Courier, CourierConfig, NewItem, Priority, processor_fn};
//!
//! let courier: Courier<ChatAction, _> = Courier::open("courier.db", transport, CourierConfig::default())?;
//! courier.init().await?;
//!
//! courier.queue().set_processor(processor_fn(|item| async move { api.send(item).await }));
//! courier
//!     .queue()
//!     .add(NewItem::new(ChatAction::Typing { chat_id: "c1".into(), is_typing: true }).priority(Priority::Low))
//!     .await?;
//!
//! let synced = courier.sync().sync_chat("c1").await?;
//! ```
//!
//! ## Crate Structure
//!
//! - `courier-core`: items, cursors, payloads, clocks
//! - `courier-store`: key-value persistence, item store, cursor store
//! - `courier-queue`: the offline queue
//! - `courier-sync`: the sync manager
//! - `courier` (this crate): the combined handle and configuration

pub mod config;
pub mod courier;
pub mod error;

pub use config::CourierConfig;
pub use courier::Courier;
pub use error::{CourierError, Result};

// Re-export commonly used types
pub use courier_core::{
    ChatAction, Clock, DedupKey, ItemId, ItemStatus, ManualClock, Payload, Priority, QueueItem,
    QueueStats, SyncCursor, SystemClock,
};
pub use courier_queue::{
    processor_fn, NewItem, OfflineQueue, Processor, QueueConfig, QueueError, QueueEvent,
};
pub use courier_store::{
    CursorStore, KvStore, LoadReport, MemoryKvStore, Namespaced, SqliteKvStore, StoreError,
};
pub use courier_sync::{
    BatchPriority, PriorityBatch, SyncConfig, SyncError, SyncEvent, SyncManager, SyncOptions,
    SyncProgress, SyncRecord, SyncRequest, SyncResponse, SyncResult, SyncStatus, SyncStrategy,
    SyncTransport,
};
