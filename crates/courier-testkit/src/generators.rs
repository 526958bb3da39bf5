//! Proptest generators for property-based testing.

use proptest::prelude::*;

use courier_core::{ChatAction, ItemStatus, Priority, QueueItem, SyncCursor};

/// Generate a Priority.
pub fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Critical),
        Just(Priority::High),
        Just(Priority::Normal),
        Just(Priority::Low),
    ]
}

/// Generate an ItemStatus.
pub fn status() -> impl Strategy<Value = ItemStatus> {
    prop_oneof![
        Just(ItemStatus::Pending),
        Just(ItemStatus::Sending),
        Just(ItemStatus::Success),
        Just(ItemStatus::Failed),
        Just(ItemStatus::Expired),
    ]
}

/// Generate a short conversation id.
pub fn chat_id() -> impl Strategy<Value = String> {
    "c[0-9]{1,3}"
}

/// Generate a message id.
pub fn message_id() -> impl Strategy<Value = String> {
    "m[0-9a-f]{1,12}"
}

/// Generate any ChatAction.
pub fn chat_action() -> impl Strategy<Value = ChatAction> {
    prop_oneof![
        (chat_id(), ".{0,64}", proptest::option::of(message_id())).prop_map(
            |(chat_id, content, reply_to)| ChatAction::SendMessage {
                chat_id,
                content,
                reply_to,
            }
        ),
        (chat_id(), message_id(), ".{0,64}").prop_map(|(chat_id, message_id, content)| {
            ChatAction::EditMessage {
                chat_id,
                message_id,
                content,
            }
        }),
        (chat_id(), message_id())
            .prop_map(|(chat_id, message_id)| ChatAction::DeleteMessage { chat_id, message_id }),
        (chat_id(), message_id())
            .prop_map(|(chat_id, message_id)| ChatAction::MarkRead { chat_id, message_id }),
        (chat_id(), message_id(), "\\PC{1,2}", any::<bool>()).prop_map(
            |(chat_id, message_id, emoji, remove)| ChatAction::Reaction {
                chat_id,
                message_id,
                emoji,
                remove,
            }
        ),
        (chat_id(), any::<bool>())
            .prop_map(|(chat_id, is_typing)| ChatAction::Typing { chat_id, is_typing }),
    ]
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=i64::MAX / 2
}

/// Generate a queue item in any status, with or without expiry.
pub fn queue_item() -> impl Strategy<Value = QueueItem<ChatAction>> {
    (
        chat_action(),
        priority(),
        status(),
        timestamp(),
        0u32..5,
        proptest::option::of(0u64..100_000),
    )
        .prop_map(|(action, priority, status, created_at, retry_count, ttl)| {
            let mut item =
                QueueItem::new(action, priority, created_at).with_ttl(ttl.unwrap_or(0));
            item.status = status;
            item.retry_count = retry_count;
            item
        })
}

/// Generate a global or chat-scoped cursor.
pub fn sync_cursor() -> impl Strategy<Value = SyncCursor> {
    (
        proptest::option::of(message_id()),
        timestamp(),
        proptest::option::of(chat_id()),
    )
        .prop_map(|(last_message_id, last_sync_time, chat_id)| SyncCursor {
            last_message_id,
            last_sync_time,
            chat_id,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_store::codec;

    proptest! {
        #[test]
        fn stored_items_decode_to_the_same_item(item in queue_item()) {
            let bytes = codec::encode(&item).unwrap();
            let decoded: QueueItem<ChatAction> = codec::decode(&bytes).unwrap();
            prop_assert_eq!(decoded, item);
        }

        #[test]
        fn expiry_never_claims_delivered_items(item in queue_item(), now in timestamp()) {
            if item.status == ItemStatus::Success {
                prop_assert!(!item.is_expired(now));
            }
            if item.is_ready(now) {
                prop_assert_eq!(item.status, ItemStatus::Pending);
            }
        }
    }
}
