//! Error types for the queue module.

use thiserror::Error;

use courier_core::ItemId;
use courier_store::StoreError;

/// Structural queue failures.
///
/// Per-item delivery failures never surface here: they are absorbed by the
/// retry policy and reported through [`QueueEvent`](crate::QueueEvent)s.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue already holds `max_queue_size` items.
    #[error("queue is full ({max} items)")]
    QueueFull { max: usize },

    /// No item with this id.
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    /// Dispatch was requested before a processor was registered.
    #[error("no processor registered")]
    ProcessorNotSet,

    /// Dispatch was requested while offline.
    #[error("network is offline")]
    NetworkOffline,

    /// The queue was used before `init()`.
    #[error("queue not initialized")]
    NotInitialized,

    /// Persistence failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl QueueError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::QueueFull { .. } => "QUEUE_FULL",
            QueueError::ItemNotFound(_) => "ITEM_NOT_FOUND",
            QueueError::ProcessorNotSet => "PROCESSOR_NOT_SET",
            QueueError::NetworkOffline => "NETWORK_OFFLINE",
            QueueError::NotInitialized => "NOT_INITIALIZED",
            QueueError::Store(_) => "STORE_ERROR",
        }
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
