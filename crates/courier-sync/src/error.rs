//! Error types for the sync module.

use thiserror::Error;

use courier_store::StoreError;

/// Errors that can occur during sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The transport could not reach the remote side.
    #[error("network error: {0}")]
    Network(String),

    /// The request took too long.
    #[error("request timed out")]
    Timeout,

    /// The remote side answered with a failure.
    #[error("server error: {0}")]
    Server(String),

    /// The response could not be understood.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The sync was cancelled by `abort()`.
    #[error("sync aborted")]
    Aborted,

    /// Another sync is already running.
    #[error("a sync is already in progress")]
    InProgress,

    /// Cursor persistence failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_) | SyncError::Timeout | SyncError::Server(_)
        )
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Network(_) => "NETWORK_ERROR",
            SyncError::Timeout => "TIMEOUT",
            SyncError::Server(_) => "SERVER_ERROR",
            SyncError::InvalidData(_) => "INVALID_DATA",
            SyncError::Aborted => "ABORTED",
            SyncError::InProgress => "IN_PROGRESS",
            SyncError::Store(_) => "STORE_ERROR",
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SyncError::Network("reset".into()).is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::Server("503".into()).is_retryable());
        assert!(!SyncError::InvalidData("bad json".into()).is_retryable());
        assert!(!SyncError::Aborted.is_retryable());
        assert_eq!(SyncError::Timeout.code(), "TIMEOUT");
    }
}
