//! # Courier Sync
//!
//! Cursor-tracked synchronization of remote history into the client.
//!
//! ## Strategies
//!
//! - **Incremental**: changes since the stored cursor, globally or for one
//!   conversation.
//! - **Full**: the same request from an empty cursor; the stored cursor is
//!   replaced on success.
//! - **Priority**: a sequence of batches over the global cursor, each waiting
//!   its configured delay, never overlapping.
//!
//! Requests go through a [`SyncTransport`]. Transient failures are retried
//! with linear backoff; `abort()` cancels a running sync without touching
//! stored cursors.

pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod transport;

pub use config::{BatchPriority, PriorityBatch, SyncConfig};
pub use error::{Result, SyncError};
pub use events::{SyncEvent, SyncProgress, SyncStatus};
pub use manager::{SyncManager, SyncOptions, SyncResult};
pub use transport::{SyncRecord, SyncRequest, SyncResponse, SyncStrategy, SyncTransport};
