//! Queue items and their state machine.
//!
//! ```text
//! pending --dispatch--> sending --ok--> success
//!    ^                    |
//!    +--fail, retries ----+--fail, exhausted--> failed
//!    |   remain                                  |
//!    +----------------retry(id)------------------+
//!
//! pending | sending | failed --expiry detected--> expired
//! ```
//!
//! `success` and `expired` are terminal.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::payload::Payload;
use crate::types::{DedupKey, ItemId};

/// Dispatch urgency. Lower values are more urgent and are selected first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
}

impl Priority {
    /// Numeric value of this priority.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse from the numeric value.
    pub fn from_u8(value: u8) -> Result<Self, CoreError> {
        match value {
            0 => Ok(Priority::Critical),
            1 => Ok(Priority::High),
            2 => Ok(Priority::Normal),
            3 => Ok(Priority::Low),
            other => Err(CoreError::UnknownPriority(other)),
        }
    }
}

/// Lifecycle status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Sending,
    Success,
    Failed,
    Expired,
}

impl ItemStatus {
    /// Whether no further transition is possible.
    pub const fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Success | ItemStatus::Expired)
    }

    /// Whether `self -> to` is an edge of the state machine.
    pub const fn can_transition_to(self, to: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, to),
            (Pending, Sending)
                | (Sending, Success)
                | (Sending, Pending)
                | (Sending, Failed)
                | (Failed, Pending)
                | (Pending, Expired)
                | (Sending, Expired)
                | (Failed, Expired)
        )
    }

    /// Lowercase name, as persisted.
    pub const fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Sending => "sending",
            ItemStatus::Success => "success",
            ItemStatus::Failed => "failed",
            ItemStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of pending outbound work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem<P> {
    pub id: ItemId,
    pub payload: P,
    pub priority: Priority,
    pub status: ItemStatus,
    /// Creation time (Unix ms).
    pub created_at: i64,
    /// Insertion counter; FIFO tie-breaker within equal priority.
    pub sequence: u64,
    pub last_attempt_at: Option<i64>,
    pub retry_count: u32,
    pub expires_at: Option<i64>,
    /// Earliest time a retried item may be dispatched again.
    pub next_attempt_at: Option<i64>,
    pub error: Option<String>,
    pub dedup_key: DedupKey,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl<P: Payload> QueueItem<P> {
    /// Create a fresh pending item.
    pub fn new(payload: P, priority: Priority, created_at: i64) -> Self {
        Self {
            id: ItemId::generate(created_at),
            payload,
            priority,
            status: ItemStatus::Pending,
            created_at,
            sequence: 0,
            last_attempt_at: None,
            retry_count: 0,
            expires_at: None,
            next_attempt_at: None,
            error: None,
            dedup_key: DedupKey::generate(),
            metadata: BTreeMap::new(),
        }
    }

    /// Expire `ttl_ms` after creation. A ttl of zero means never.
    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        let created_at = self.created_at;
        self.expires_at = (ttl_ms > 0).then(|| created_at.saturating_add(ttl_ms as i64));
        self
    }

    /// Attach opaque metadata.
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the insertion counter.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// The payload's type tag.
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

impl<P> QueueItem<P> {
    /// Past its expiry and not successfully delivered.
    ///
    /// This is the logical view: it holds whatever the stored status says.
    pub fn is_expired(&self, now: i64) -> bool {
        self.status != ItemStatus::Success && self.expires_at.is_some_and(|at| at < now)
    }

    /// Pending, not waiting out a backoff delay, and not expired.
    pub fn is_ready(&self, now: i64) -> bool {
        self.status == ItemStatus::Pending
            && self.next_attempt_at.map_or(true, |at| at <= now)
            && !self.is_expired(now)
    }

    /// Sort key for dispatch selection.
    pub fn dispatch_key(&self) -> (Priority, i64, u64) {
        (self.priority, self.created_at, self.sequence)
    }

    /// Move to `to`, enforcing the state machine.
    pub fn transition(&mut self, to: ItemStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(to) {
            return Err(CoreError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Aggregate counts over the current items. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub sending: usize,
    pub success: usize,
    pub failed: usize,
    pub expired: usize,
}

impl QueueStats {
    /// Compute stats in one pass.
    ///
    /// A non-success item past its expiry counts as expired whatever its
    /// stored status is.
    pub fn from_items<'a, P: 'a>(items: impl IntoIterator<Item = &'a QueueItem<P>>, now: i64) -> Self {
        let mut stats = Self::default();
        for item in items {
            stats.total += 1;
            if item.is_expired(now) {
                stats.expired += 1;
                continue;
            }
            match item.status {
                ItemStatus::Pending => stats.pending += 1,
                ItemStatus::Sending => stats.sending += 1,
                ItemStatus::Success => stats.success += 1,
                ItemStatus::Failed => stats.failed += 1,
                ItemStatus::Expired => stats.expired += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ChatAction;

    fn typing() -> ChatAction {
        ChatAction::Typing {
            chat_id: "c1".into(),
            is_typing: true,
        }
    }

    #[test]
    fn test_new_item_defaults() {
        let item = QueueItem::new(typing(), Priority::High, 1_000);
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.retry_count, 0);
        assert_eq!(item.expires_at, None);
        assert_eq!(item.kind(), "typing");
    }

    #[test]
    fn test_ttl_zero_never_expires() {
        let item = QueueItem::new(typing(), Priority::Normal, 1_000).with_ttl(0);
        assert_eq!(item.expires_at, None);
        assert!(!item.is_expired(i64::MAX));

        let item = QueueItem::new(typing(), Priority::Normal, 1_000).with_ttl(500);
        assert_eq!(item.expires_at, Some(1_500));
        assert!(!item.is_expired(1_500));
        assert!(item.is_expired(1_501));
    }

    #[test]
    fn test_success_never_expires() {
        let mut item = QueueItem::new(typing(), Priority::Normal, 1_000).with_ttl(10);
        item.transition(ItemStatus::Sending).unwrap();
        item.transition(ItemStatus::Success).unwrap();
        assert!(!item.is_expired(5_000));
    }

    #[test]
    fn test_transitions() {
        use ItemStatus::*;
        assert!(Pending.can_transition_to(Sending));
        assert!(Sending.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Success));
        assert!(!Success.can_transition_to(Pending));
        assert!(!Expired.can_transition_to(Pending));
        assert!(Success.is_terminal() && Expired.is_terminal());

        let mut item = QueueItem::new(typing(), Priority::Normal, 0);
        let err = item.transition(Failed).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { from: Pending, to: Failed, .. }));
    }

    #[test]
    fn test_is_ready_respects_backoff() {
        let mut item = QueueItem::new(typing(), Priority::Normal, 0);
        assert!(item.is_ready(0));
        item.next_attempt_at = Some(100);
        assert!(!item.is_ready(99));
        assert!(item.is_ready(100));
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert_eq!(Priority::from_u8(3).unwrap(), Priority::Low);
        assert!(Priority::from_u8(9).is_err());
    }

    #[test]
    fn test_stats_counts_logically_expired() {
        let a = QueueItem::new(typing(), Priority::Normal, 0).with_ttl(10);
        let mut b = QueueItem::new(typing(), Priority::Normal, 0);
        b.status = ItemStatus::Failed;
        let mut c = QueueItem::new(typing(), Priority::Normal, 0).with_ttl(10);
        c.status = ItemStatus::Success;

        let stats = QueueStats::from_items([&a, &b, &c], 100);
        assert_eq!(
            stats,
            QueueStats {
                total: 3,
                pending: 0,
                sending: 0,
                success: 1,
                failed: 1,
                expired: 1,
            }
        );
    }

    #[test]
    fn test_item_cbor_roundtrip_keeps_payload_tag() {
        let item = QueueItem::new(typing(), Priority::Low, 42).with_sequence(7);
        let mut buf = Vec::new();
        ciborium::into_writer(&item, &mut buf).unwrap();
        let back: QueueItem<ChatAction> = ciborium::from_reader(&buf[..]).unwrap();
        assert_eq!(back, item);
    }
}
