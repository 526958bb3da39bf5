//! ItemStore: durable id → item map for the offline queue.
//!
//! Every item lives under its own key (`{prefix}item:{id}`), so a mutation
//! rewrites one record rather than the whole collection. The in-memory index
//! is the source of truth between restarts; the key-value store is written
//! through on every change.
//!
//! All mutations take an async mutex that is held across the persistence
//! write, so two tasks can never interleave a read-modify-write of the same
//! item.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use courier_core::{ItemId, ItemStatus, Payload, QueueItem, QueueStats};

use crate::codec;
use crate::error::{Result, StoreError};
use crate::traits::KvStore;

/// What `init` found on disk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// Items loaded into memory.
    pub loaded: usize,
    /// Items interrupted mid-send and reset to pending.
    pub recovered: usize,
    /// Records that could not be decoded.
    pub skipped: usize,
}

/// Result of [`ItemStore::update_with`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome<P> {
    /// No item with that id.
    NotFound,
    /// The closure declined to change the item.
    Unchanged(QueueItem<P>),
    /// The item was changed and persisted.
    Updated(QueueItem<P>),
}

/// Items selected by [`ItemStore::claim_ready`].
#[derive(Debug, Clone)]
pub struct Claim<P> {
    /// Items now marked `sending`, in dispatch order.
    pub ready: Vec<QueueItem<P>>,
    /// Pending items found past their expiry and marked `expired`.
    pub expired: Vec<QueueItem<P>>,
}

struct ItemState<P> {
    items: HashMap<ItemId, QueueItem<P>>,
    next_sequence: u64,
}

/// Durable item map over a [`KvStore`].
pub struct ItemStore<P> {
    kv: Arc<dyn KvStore>,
    prefix: String,
    state: Mutex<ItemState<P>>,
}

impl<P: Payload> ItemStore<P> {
    /// Create a store whose keys start with `namespace` (e.g. `"offline_queue:"`).
    pub fn new(kv: Arc<dyn KvStore>, namespace: &str) -> Self {
        Self {
            kv,
            prefix: format!("{}item:", namespace),
            state: Mutex::new(ItemState {
                items: HashMap::new(),
                next_sequence: 0,
            }),
        }
    }

    fn key(&self, id: &ItemId) -> String {
        format!("{}{}", self.prefix, id)
    }

    async fn persist(&self, item: &QueueItem<P>) -> Result<()> {
        let bytes = codec::encode(item)?;
        self.kv.set(&self.key(&item.id), bytes).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Load every persisted item into memory.
    ///
    /// Items stored as `sending` were interrupted by a crash before their
    /// outcome was recorded; they are reset to `pending` and will be sent
    /// again.
    pub async fn init(&self) -> Result<LoadReport> {
        let mut state = self.state.lock().await;
        let mut report = LoadReport::default();

        state.items.clear();
        state.next_sequence = 0;

        for key in self.kv.keys(&self.prefix).await? {
            let Some(bytes) = self.kv.get(&key).await? else {
                continue;
            };

            let mut item: QueueItem<P> = match codec::decode(&bytes) {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(%key, error = %e, "skipping undecodable queue record");
                    report.skipped += 1;
                    continue;
                }
            };

            if item.status == ItemStatus::Sending {
                item.status = ItemStatus::Pending;
                self.persist(&item).await?;
                report.recovered += 1;
            }

            state.next_sequence = state.next_sequence.max(item.sequence + 1);
            state.items.insert(item.id.clone(), item);
            report.loaded += 1;
        }

        tracing::debug!(
            loaded = report.loaded,
            recovered = report.recovered,
            skipped = report.skipped,
            "item store loaded"
        );
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a new item, assigning its insertion sequence.
    pub async fn add(&self, item: QueueItem<P>) -> Result<QueueItem<P>> {
        match self.add_within(item, usize::MAX).await? {
            Some(item) => Ok(item),
            None => Err(StoreError::InvalidData("item store is full".to_string())),
        }
    }

    /// Insert a new item unless `capacity` items are already held.
    ///
    /// Returns `None` without writing anything when the store is full.
    pub async fn add_within(
        &self,
        mut item: QueueItem<P>,
        capacity: usize,
    ) -> Result<Option<QueueItem<P>>> {
        let mut state = self.state.lock().await;

        if state.items.len() >= capacity {
            return Ok(None);
        }

        if state.items.contains_key(&item.id) {
            return Err(StoreError::InvalidData(format!(
                "duplicate item id: {}",
                item.id
            )));
        }

        item.sequence = state.next_sequence;
        self.persist(&item).await?;

        state.next_sequence += 1;
        state.items.insert(item.id.clone(), item.clone());
        Ok(Some(item))
    }

    /// Replace an existing item wholesale. Returns false if it is unknown.
    pub async fn update(&self, item: QueueItem<P>) -> Result<bool> {
        let mut state = self.state.lock().await;

        if !state.items.contains_key(&item.id) {
            return Ok(false);
        }

        self.persist(&item).await?;
        state.items.insert(item.id.clone(), item);
        Ok(true)
    }

    /// Read-modify-write one item atomically.
    ///
    /// `f` works on a copy; returning `true` persists the copy and makes it
    /// current, returning `false` discards it.
    pub async fn update_with<F>(&self, id: &ItemId, f: F) -> Result<UpdateOutcome<P>>
    where
        F: FnOnce(&mut QueueItem<P>) -> bool,
    {
        let mut state = self.state.lock().await;

        let Some(current) = state.items.get(id) else {
            return Ok(UpdateOutcome::NotFound);
        };

        let mut next = current.clone();
        if !f(&mut next) {
            return Ok(UpdateOutcome::Unchanged(next));
        }

        self.persist(&next).await?;
        state.items.insert(id.clone(), next.clone());
        Ok(UpdateOutcome::Updated(next))
    }

    /// Remove one item, returning it if it existed.
    pub async fn remove(&self, id: &ItemId) -> Result<Option<QueueItem<P>>> {
        let mut state = self.state.lock().await;

        if !state.items.contains_key(id) {
            return Ok(None);
        }

        self.kv.remove(&self.key(id)).await?;
        Ok(state.items.remove(id))
    }

    /// Remove several items, returning those that existed.
    pub async fn remove_many(&self, ids: &[ItemId]) -> Result<Vec<QueueItem<P>>> {
        let mut state = self.state.lock().await;

        let present: Vec<&ItemId> = ids.iter().filter(|id| state.items.contains_key(id)).collect();
        if present.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = present.iter().map(|id| self.key(id)).collect();
        self.kv.remove_many(&keys).await?;

        let removed = ids.iter().filter_map(|id| state.items.remove(id)).collect();
        Ok(removed)
    }

    /// Remove every item, including records that failed to decode.
    pub async fn clear(&self) -> Result<usize> {
        let mut state = self.state.lock().await;

        let keys = self.kv.keys(&self.prefix).await?;
        self.kv.remove_many(&keys).await?;

        let count = state.items.len();
        state.items.clear();
        Ok(count)
    }

    /// Select up to `limit` ready items and mark them `sending`.
    ///
    /// Selection follows dispatch order (priority, then creation time, then
    /// insertion sequence). Pending items past their expiry are marked
    /// `expired` instead of being dispatched. Items still waiting out a
    /// backoff delay are skipped.
    ///
    /// All or nothing: if any write fails, records already written by this
    /// claim are put back and no item changes status.
    pub async fn claim_ready(&self, limit: usize, now: i64) -> Result<Claim<P>> {
        let mut state = self.state.lock().await;

        let mut pending: Vec<&QueueItem<P>> = state
            .items
            .values()
            .filter(|item| item.status == ItemStatus::Pending)
            .collect();
        pending.sort_by_key(|item| item.dispatch_key());

        // (stored, claimed) pairs, persisted but not yet applied in memory
        let mut written: Vec<(QueueItem<P>, QueueItem<P>)> = Vec::new();
        let mut ready = 0;

        for current in pending {
            if ready >= limit {
                break;
            }

            let mut next = current.clone();
            if next.is_expired(now) {
                next.status = ItemStatus::Expired;
            } else if next.is_ready(now) {
                next.status = ItemStatus::Sending;
                next.last_attempt_at = Some(now);
                ready += 1;
            } else {
                continue;
            }

            if let Err(e) = self.persist(&next).await {
                self.restore(&written).await;
                return Err(e);
            }
            written.push((current.clone(), next));
        }

        let mut claim = Claim {
            ready: Vec::new(),
            expired: Vec::new(),
        };
        for (_, next) in written {
            if next.status == ItemStatus::Sending {
                claim.ready.push(next.clone());
            } else {
                claim.expired.push(next.clone());
            }
            state.items.insert(next.id.clone(), next);
        }

        Ok(claim)
    }

    /// Put back the records of a claim that failed part way.
    async fn restore(&self, written: &[(QueueItem<P>, QueueItem<P>)]) {
        for (stored, _) in written {
            if let Err(e) = self.persist(stored).await {
                tracing::warn!(id = %stored.id, error = %e, "failed to restore record after aborted claim");
            }
        }
    }

    /// Mark every logically expired item as `expired` and return them all.
    ///
    /// Items already stored as `expired` are returned unchanged. Success
    /// items are never touched.
    pub async fn expire_due(&self, now: i64) -> Result<Vec<QueueItem<P>>> {
        let mut state = self.state.lock().await;

        let ids: Vec<ItemId> = state
            .items
            .values()
            .filter(|item| item.is_expired(now))
            .map(|item| item.id.clone())
            .collect();

        let mut expired = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(current) = state.items.get(&id) else {
                continue;
            };
            let mut next = current.clone();
            if next.status != ItemStatus::Expired {
                next.status = ItemStatus::Expired;
                self.persist(&next).await?;
                state.items.insert(id, next.clone());
            }
            expired.push(next);
        }

        Ok(expired)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Get one item.
    pub async fn get(&self, id: &ItemId) -> Option<QueueItem<P>> {
        self.state.lock().await.items.get(id).cloned()
    }

    /// All items in dispatch order.
    pub async fn all(&self) -> Vec<QueueItem<P>> {
        let state = self.state.lock().await;
        let mut items: Vec<QueueItem<P>> = state.items.values().cloned().collect();
        items.sort_by_key(|item| item.dispatch_key());
        items
    }

    /// Number of items held.
    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    /// Whether no items are held.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Pending items in dispatch order: priority ascending, then FIFO.
    pub async fn get_pending(&self, limit: Option<usize>) -> Vec<QueueItem<P>> {
        let mut items = self.by_status(ItemStatus::Pending).await;
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        items
    }

    /// Whether any item is pending, ready or not.
    pub async fn has_pending(&self) -> bool {
        let state = self.state.lock().await;
        state
            .items
            .values()
            .any(|item| item.status == ItemStatus::Pending)
    }

    /// Items whose retries are exhausted.
    pub async fn get_failed(&self) -> Vec<QueueItem<P>> {
        self.by_status(ItemStatus::Failed).await
    }

    /// Items with `expires_at < now` that were not delivered.
    pub async fn get_expired(&self, now: i64) -> Vec<QueueItem<P>> {
        let state = self.state.lock().await;
        let mut items: Vec<QueueItem<P>> = state
            .items
            .values()
            .filter(|item| item.is_expired(now))
            .cloned()
            .collect();
        items.sort_by_key(|item| item.dispatch_key());
        items
    }

    /// Items with a given stored status, in dispatch order.
    pub async fn by_status(&self, status: ItemStatus) -> Vec<QueueItem<P>> {
        let state = self.state.lock().await;
        let mut items: Vec<QueueItem<P>> = state
            .items
            .values()
            .filter(|item| item.status == status)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.dispatch_key());
        items
    }

    /// Aggregate counts, recomputed on every call.
    pub async fn stats(&self, now: i64) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats::from_items(state.items.values(), now)
    }
}
