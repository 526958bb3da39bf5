//! Sync cursors.
//!
//! A cursor is a bookmark of the last synchronized position in a message
//! stream. Without a `chat_id` it is the global cursor; with one it belongs
//! to that conversation.

use serde::{Deserialize, Serialize};

/// Bookmark into a remote message stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Id of the last message seen, `None` before the first sync.
    pub last_message_id: Option<String>,
    /// When the cursor was last advanced (Unix ms), `0` if never.
    pub last_sync_time: i64,
    /// Conversation scope; `None` for the global cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

impl SyncCursor {
    /// An empty global cursor.
    pub fn empty() -> Self {
        Self::default()
    }

    /// An empty cursor scoped to one conversation.
    pub fn for_chat(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: Some(chat_id.into()),
            ..Self::default()
        }
    }

    /// Whether this is the global cursor.
    pub fn is_global(&self) -> bool {
        self.chat_id.is_none()
    }

    /// Whether the cursor has never been advanced.
    pub fn is_empty(&self) -> bool {
        self.last_message_id.is_none() && self.last_sync_time == 0
    }

    /// A copy advanced to `last_message_id` at `timestamp`. `self` is untouched.
    pub fn advanced(&self, last_message_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            last_message_id: Some(last_message_id.into()),
            last_sync_time: timestamp,
            chat_id: self.chat_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cursor() {
        let global = SyncCursor::empty();
        assert!(global.is_global());
        assert!(global.is_empty());

        let chat = SyncCursor::for_chat("c1");
        assert!(!chat.is_global());
        assert!(chat.is_empty());
    }

    #[test]
    fn test_advanced_keeps_scope_and_original() {
        let chat = SyncCursor::for_chat("c1");
        let next = chat.advanced("m42", 9_000);

        assert_eq!(next.chat_id.as_deref(), Some("c1"));
        assert_eq!(next.last_message_id.as_deref(), Some("m42"));
        assert_eq!(next.last_sync_time, 9_000);
        assert!(chat.is_empty());
    }
}
