//! CursorStore: durable sync bookmarks, one per scope.
//!
//! Keys: `{prefix}global` for the global cursor and `{prefix}chat:{id}` for
//! each conversation. Every cursor is its own record, so saving one never
//! rewrites another.

use std::sync::Arc;

use courier_core::{Clock, SyncCursor, SystemClock};

use crate::codec;
use crate::error::Result;
use crate::traits::KvStore;

/// Default key prefix for cursor records.
pub const DEFAULT_CURSOR_PREFIX: &str = "sync_cursor:";

/// Durable per-scope sync cursors.
pub struct CursorStore {
    kv: Arc<dyn KvStore>,
    prefix: String,
    clock: Arc<dyn Clock>,
}

impl CursorStore {
    /// Cursor store under [`DEFAULT_CURSOR_PREFIX`] using the system clock.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self::with_prefix(kv, DEFAULT_CURSOR_PREFIX, Arc::new(SystemClock))
    }

    /// Cursor store with an explicit prefix and clock.
    pub fn with_prefix(kv: Arc<dyn KvStore>, prefix: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            kv,
            prefix: prefix.to_string(),
            clock,
        }
    }

    fn global_key(&self) -> String {
        format!("{}global", self.prefix)
    }

    fn chat_prefix(&self) -> String {
        format!("{}chat:", self.prefix)
    }

    fn chat_key(&self, chat_id: &str) -> String {
        format!("{}{}", self.chat_prefix(), chat_id)
    }

    async fn load(&self, key: &str) -> Result<Option<SyncCursor>> {
        match self.kv.get(key).await? {
            Some(bytes) => match codec::decode(&bytes) {
                Ok(cursor) => Ok(Some(cursor)),
                Err(e) => {
                    tracing::warn!(%key, error = %e, "discarding unreadable sync cursor");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn store(&self, key: &str, cursor: &SyncCursor) -> Result<()> {
        self.kv.set(key, codec::encode(cursor)?).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Global cursor
    // ─────────────────────────────────────────────────────────────────────────

    /// The global cursor, empty if never saved.
    pub async fn get_global_cursor(&self) -> Result<SyncCursor> {
        Ok(self.load(&self.global_key()).await?.unwrap_or_default())
    }

    /// Save the global cursor. Any scope on `cursor` is dropped.
    pub async fn save_global_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        let cursor = SyncCursor {
            chat_id: None,
            ..cursor.clone()
        };
        self.store(&self.global_key(), &cursor).await
    }

    /// Overwrite the global cursor with an empty one.
    pub async fn reset_global_cursor(&self) -> Result<()> {
        self.save_global_cursor(&SyncCursor::empty()).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Per-conversation cursors
    // ─────────────────────────────────────────────────────────────────────────

    /// The cursor for one conversation, empty if never saved.
    pub async fn get_chat_cursor(&self, chat_id: &str) -> Result<SyncCursor> {
        let cursor = self.load(&self.chat_key(chat_id)).await?;
        Ok(cursor.unwrap_or_else(|| SyncCursor::for_chat(chat_id)))
    }

    /// Save the cursor for one conversation. The record carries `chat_id`.
    pub async fn save_chat_cursor(&self, chat_id: &str, cursor: &SyncCursor) -> Result<()> {
        let cursor = SyncCursor {
            chat_id: Some(chat_id.to_string()),
            ..cursor.clone()
        };
        self.store(&self.chat_key(chat_id), &cursor).await
    }

    /// Overwrite one conversation's cursor with an empty one.
    pub async fn reset_chat_cursor(&self, chat_id: &str) -> Result<()> {
        self.save_chat_cursor(chat_id, &SyncCursor::for_chat(chat_id))
            .await
    }

    /// Every saved conversation cursor.
    pub async fn get_all_chat_cursors(&self) -> Result<Vec<SyncCursor>> {
        let mut cursors = Vec::new();
        for key in self.kv.keys(&self.chat_prefix()).await? {
            if let Some(cursor) = self.load(&key).await? {
                cursors.push(cursor);
            }
        }
        Ok(cursors)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Both scopes
    // ─────────────────────────────────────────────────────────────────────────

    /// Advance `cursor` and persist the result under the cursor's own scope.
    ///
    /// `cursor` is not modified; use the returned value. `timestamp`
    /// defaults to now.
    pub async fn update_cursor(
        &self,
        cursor: &SyncCursor,
        last_message_id: &str,
        timestamp: Option<i64>,
    ) -> Result<SyncCursor> {
        let timestamp = timestamp.unwrap_or_else(|| self.clock.now());
        let next = cursor.advanced(last_message_id, timestamp);

        match next.chat_id.as_deref() {
            Some(chat_id) => self.save_chat_cursor(chat_id, &next).await?,
            None => self.save_global_cursor(&next).await?,
        }

        Ok(next)
    }

    /// Remove every cursor under this store's prefix.
    pub async fn clear_all_cursors(&self) -> Result<usize> {
        let keys = self.kv.keys(&self.prefix).await?;
        self.kv.remove_many(&keys).await?;
        tracing::info!(count = keys.len(), "cleared sync cursors");
        Ok(keys.len())
    }
}
