//! Transport abstraction for sync requests.
//!
//! The transport performs one round trip against the remote service. It may
//! use HTTP, a WebSocket RPC or anything else; the manager only sees
//! [`SyncRequest`] in and [`SyncResponse`] out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::BatchPriority;
use crate::error::Result;

/// How a sync selects what to fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Changes since the stored cursor.
    #[default]
    Incremental,
    /// Everything, starting from an empty cursor.
    Full,
    /// Sequential batches over the global cursor.
    Priority,
}

impl SyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStrategy::Incremental => "incremental",
            SyncStrategy::Full => "full",
            SyncStrategy::Priority => "priority",
        }
    }
}

/// A record returned by sync that may carry an id usable as a cursor.
pub trait SyncRecord: Clone + Send + Sync + 'static {
    fn record_id(&self) -> Option<String>;
}

impl SyncRecord for Value {
    /// The `id` field, string or number.
    fn record_id(&self) -> Option<String> {
        match self.get("id")? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }
}

/// One sync round trip as sent to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRequest {
    pub strategy: Option<SyncStrategy>,
    pub limit: usize,
    /// Last message id already held; `None` fetches from the beginning.
    pub cursor: Option<String>,
    /// Last sync time of the cursor (Unix ms).
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub include_deleted: bool,
    /// Set on priority batches only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<BatchPriority>,
}

/// What the transport got back.
///
/// Results arrive under exactly one of `items`, `messages` or `chats`,
/// depending on the call shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse<I> {
    #[serde(default)]
    pub items: Option<Vec<I>>,
    #[serde(default)]
    pub messages: Option<Vec<I>>,
    #[serde(default)]
    pub chats: Option<Vec<I>>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub count: Option<usize>,
}

impl<I> Default for SyncResponse<I> {
    fn default() -> Self {
        Self {
            items: None,
            messages: None,
            chats: None,
            has_more: false,
            next_cursor: None,
            count: None,
        }
    }
}

impl<I> SyncResponse<I> {
    /// A response carrying `items` under the generic field.
    pub fn with_items(items: Vec<I>) -> Self {
        Self {
            items: Some(items),
            ..Self::default()
        }
    }

    pub fn has_more(mut self, has_more: bool) -> Self {
        self.has_more = has_more;
        self
    }

    pub fn next_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.next_cursor = Some(cursor.into());
        self
    }

    /// The authoritative result list: `items`, else `messages`, else `chats`.
    pub fn into_records(self) -> Vec<I> {
        self.items
            .or(self.messages)
            .or(self.chats)
            .unwrap_or_default()
    }
}

/// Performs sync round trips.
///
/// Implementations report failures with the matching [`SyncError`]
/// variant so the manager can tell transient failures from permanent ones.
///
/// [`SyncError`]: crate::SyncError
#[async_trait]
pub trait SyncTransport: Send + Sync + 'static {
    type Item: SyncRecord;

    async fn request_sync(&self, request: SyncRequest) -> Result<SyncResponse<Self::Item>>;
}
