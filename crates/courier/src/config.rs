//! Combined configuration.

use serde::{Deserialize, Serialize};

use courier_queue::QueueConfig;
use courier_sync::SyncConfig;

use crate::error::Result;

/// Configuration for a [`Courier`](crate::Courier).
///
/// Every field, at every level, falls back to its default when missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub queue: QueueConfig,
    pub sync: SyncConfig,
    /// Start the auto sync schedule during `init()`.
    pub auto_sync: bool,
    /// Run an incremental sync when connectivity returns.
    pub sync_on_reconnect: bool,
}

impl CourierConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
