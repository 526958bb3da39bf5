//! Queue lifecycle events.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;

use courier_core::{ItemId, QueueItem};

/// Something that happened to the queue or one of its items.
///
/// Delivered to every [`subscribe`](crate::OfflineQueue::subscribe)r in
/// emission order. A slow subscriber sees `RecvError::Lagged` rather than
/// blocking the queue.
#[derive(Debug, Clone)]
pub enum QueueEvent<P> {
    /// An item was accepted.
    Added(QueueItem<P>),
    /// An item was refused because the queue is full. It was never stored.
    Rejected { item: QueueItem<P>, reason: String },
    /// An attempt is starting.
    Processing(QueueItem<P>),
    /// The processor accepted the item.
    Succeeded { item: QueueItem<P>, result: Value },
    /// A failed item will be retried after `delay`.
    Retrying {
        item: QueueItem<P>,
        attempt: u32,
        delay: Duration,
    },
    /// An attempt failed.
    Error {
        item: QueueItem<P>,
        error: String,
        will_retry: bool,
    },
    /// An item passed its expiry without being delivered.
    Expired(QueueItem<P>),
    /// A failed item was put back to pending by hand.
    Retried(QueueItem<P>),
    /// An item was removed.
    Removed(ItemId),
    /// Every item was removed.
    Cleared { count: usize },
    /// Connectivity flipped.
    ConnectivityChanged { online: bool },
    /// The processing loop started.
    ProcessingStarted,
    /// The processing loop stopped.
    ProcessingStopped,
}

/// Fan-out of [`QueueEvent`]s.
pub(crate) struct EventBus<P> {
    sender: broadcast::Sender<QueueEvent<P>>,
}

impl<P: Clone> EventBus<P> {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<QueueEvent<P>> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub(crate) fn emit(&self, event: QueueEvent<P>) {
        let _ = self.sender.send(event);
    }
}
