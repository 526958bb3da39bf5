//! Item payloads.
//!
//! A queue item's `type` tag is not stored separately from its payload: the
//! payload type knows its own kind. Applications either use [`ChatAction`] or
//! bring their own enum and implement [`Payload`] for it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A type-tagged payload that can be queued and persisted.
pub trait Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Short, stable tag describing what kind of action this is.
    fn kind(&self) -> &'static str;
}

/// Outbound chat actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatAction {
    /// Send a new message to a conversation.
    SendMessage {
        chat_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
    },

    /// Replace the content of a message we sent earlier.
    EditMessage {
        chat_id: String,
        message_id: String,
        content: String,
    },

    /// Delete a message.
    DeleteMessage { chat_id: String, message_id: String },

    /// Mark everything up to `message_id` as read.
    MarkRead { chat_id: String, message_id: String },

    /// Add or remove a reaction.
    Reaction {
        chat_id: String,
        message_id: String,
        emoji: String,
        remove: bool,
    },

    /// Typing indicator.
    Typing { chat_id: String, is_typing: bool },
}

impl ChatAction {
    /// The conversation this action targets.
    pub fn chat_id(&self) -> &str {
        match self {
            ChatAction::SendMessage { chat_id, .. }
            | ChatAction::EditMessage { chat_id, .. }
            | ChatAction::DeleteMessage { chat_id, .. }
            | ChatAction::MarkRead { chat_id, .. }
            | ChatAction::Reaction { chat_id, .. }
            | ChatAction::Typing { chat_id, .. } => chat_id,
        }
    }
}

impl Payload for ChatAction {
    fn kind(&self) -> &'static str {
        match self {
            ChatAction::SendMessage { .. } => "send_message",
            ChatAction::EditMessage { .. } => "edit_message",
            ChatAction::DeleteMessage { .. } => "delete_message",
            ChatAction::MarkRead { .. } => "mark_read",
            ChatAction::Reaction { .. } => "reaction",
            ChatAction::Typing { .. } => "typing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_serde_tag() {
        let action = ChatAction::MarkRead {
            chat_id: "c1".into(),
            message_id: "m9".into(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], action.kind());
        assert_eq!(action.chat_id(), "c1");
    }

    #[test]
    fn test_send_message_omits_empty_reply() {
        let action = ChatAction::SendMessage {
            chat_id: "c1".into(),
            content: "hi".into(),
            reply_to: None,
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(!json.contains("reply_to"));

        let back: ChatAction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }
}
