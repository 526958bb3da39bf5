//! Top-level error type.

use thiserror::Error;

use courier_queue::QueueError;
use courier_store::StoreError;
use courier_sync::SyncError;

/// Any error surfaced through [`Courier`](crate::Courier).
#[derive(Debug, Error)]
pub enum CourierError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl CourierError {
    /// Stable machine-readable code of the underlying error.
    pub fn code(&self) -> &'static str {
        match self {
            CourierError::Queue(e) => e.code(),
            CourierError::Sync(e) => e.code(),
            CourierError::Store(_) => "STORE_ERROR",
            CourierError::Config(_) => "INVALID_CONFIG",
        }
    }
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, CourierError>;
