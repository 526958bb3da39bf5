//! Error types for Courier Core.

use thiserror::Error;

use crate::item::ItemStatus;
use crate::types::ItemId;

/// Errors raised by the pure item rules.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid status transition for item {id}: {from} -> {to}")]
    InvalidTransition {
        id: ItemId,
        from: ItemStatus,
        to: ItemStatus,
    },

    #[error("unknown priority value: {0}")]
    UnknownPriority(u8),
}
