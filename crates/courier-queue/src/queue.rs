//! OfflineQueue: the persistent outbound queue.
//!
//! Items are accepted while offline, persisted immediately, and handed to the
//! registered [`Processor`] in priority order once connectivity allows. A
//! failed attempt is retried with exponential backoff until `max_retries` is
//! exhausted, after which the item stays `failed` until retried by hand.
//!
//! The processing loop is a single background task woken by adds,
//! reconnection and backoff timers. It is cancelled by `stop_processing`,
//! `shutdown`, or dropping the last handle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_core::{Clock, ItemId, ItemStatus, Payload, Priority, QueueItem, QueueStats, SystemClock};
use courier_store::{ItemStore, KvStore, LoadReport, UpdateOutcome};

use crate::backoff::retry_delay;
use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::events::{EventBus, QueueEvent};
use crate::processor::Processor;
use crate::timers::Timers;

/// An item to enqueue, before it gets an id.
#[derive(Debug, Clone)]
pub struct NewItem<P> {
    pub payload: P,
    pub priority: Priority,
    /// Overrides the queue's `default_ttl_ms`. Zero means never expire.
    pub ttl_ms: Option<u64>,
    pub metadata: BTreeMap<String, String>,
}

impl<P> NewItem<P> {
    /// A normal-priority item with the queue's default ttl.
    pub fn new(payload: P) -> Self {
        Self {
            payload,
            priority: Priority::Normal,
            ttl_ms: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl<P> From<P> for NewItem<P> {
    fn from(payload: P) -> Self {
        Self::new(payload)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner<P: Payload> {
    store: ItemStore<P>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    processor: RwLock<Option<Arc<dyn Processor<P>>>>,
    events: EventBus<P>,
    initialized: AtomicBool,
    online: AtomicBool,
    processing: AtomicBool,
    wake: Arc<Notify>,
    worker: Mutex<Option<CancellationToken>>,
    timers: Timers,
}

/// Persistent priority queue of outbound work.
///
/// Cheap to clone; clones share one queue.
pub struct OfflineQueue<P: Payload> {
    inner: Arc<Inner<P>>,
}

impl<P: Payload> Clone for OfflineQueue<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Payload> OfflineQueue<P> {
    /// Create a queue over `kv` using the system clock.
    pub fn new(kv: Arc<dyn KvStore>, config: QueueConfig) -> Self {
        Self::with_clock(kv, config, Arc::new(SystemClock))
    }

    /// Create a queue with an explicit time source.
    pub fn with_clock(kv: Arc<dyn KvStore>, config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        let store = ItemStore::new(kv, &config.storage_prefix);
        let events = EventBus::new(config.event_capacity);

        Self {
            inner: Arc::new(Inner {
                store,
                config,
                clock,
                processor: RwLock::new(None),
                events,
                initialized: AtomicBool::new(false),
                online: AtomicBool::new(true),
                processing: AtomicBool::new(false),
                wake: Arc::new(Notify::new()),
                worker: Mutex::new(None),
                timers: Timers::new(),
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Load persisted items and drop any that expired while we were away.
    ///
    /// Items interrupted mid-send are reset to pending. If a processor is
    /// already registered and auto-processing is on, the loop starts.
    pub async fn init(&self) -> Result<LoadReport> {
        let report = self.inner.store.init().await?;
        self.inner.initialized.store(true, Ordering::SeqCst);

        let expired = self.clean_expired().await?;
        info!(
            loaded = report.loaded,
            recovered = report.recovered,
            expired,
            "offline queue initialized"
        );

        if self.inner.config.auto_process && self.inner.processor().is_some() {
            self.start_processing();
        }
        Ok(report)
    }

    /// Stop processing and cancel pending timers. In-flight attempts finish.
    pub fn shutdown(&self) {
        self.stop_processing();
        debug!("offline queue shut down");
    }

    fn ensure_init(&self) -> Result<()> {
        if self.inner.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::NotInitialized)
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Enqueue
    // ─────────────────────────────────────────────────────────────────────────

    /// Enqueue one item.
    ///
    /// Fails with `QueueFull` when `max_queue_size` items are held; the
    /// rejected item is reported through a `Rejected` event and never stored.
    pub async fn add(&self, item: impl Into<NewItem<P>>) -> Result<QueueItem<P>> {
        self.ensure_init()?;
        let new = item.into();
        let config = &self.inner.config;

        let now = self.inner.clock.now();
        let item = QueueItem::new(new.payload, new.priority, now)
            .with_ttl(new.ttl_ms.unwrap_or(config.default_ttl_ms))
            .with_metadata(new.metadata);

        let max = config.max_queue_size;
        let Some(item) = self.inner.store.add_within(item.clone(), max).await? else {
            warn!(kind = item.kind(), max, "queue full, rejecting item");
            self.inner.events.emit(QueueEvent::Rejected {
                item,
                reason: format!("queue is full ({} items)", max),
            });
            return Err(QueueError::QueueFull { max });
        };

        debug!(id = %item.id, kind = item.kind(), priority = ?item.priority, "item queued");
        self.inner.events.emit(QueueEvent::Added(item.clone()));
        self.inner.nudge();
        Ok(item)
    }

    /// Enqueue several items in order.
    ///
    /// Stops at the first item that does not fit and returns those accepted
    /// so far.
    pub async fn add_many<I>(&self, items: I) -> Result<Vec<QueueItem<P>>>
    where
        I: IntoIterator,
        I::Item: Into<NewItem<P>>,
    {
        let mut accepted = Vec::new();
        for item in items {
            match self.add(item).await {
                Ok(item) => accepted.push(item),
                Err(QueueError::QueueFull { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(accepted)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Processing
    // ─────────────────────────────────────────────────────────────────────────

    /// Register the delivery callback, replacing any previous one.
    pub fn set_processor<T>(&self, processor: T)
    where
        T: Processor<P> + 'static,
    {
        self.set_processor_arc(Arc::new(processor));
    }

    /// Register a shared delivery callback.
    pub fn set_processor_arc(&self, processor: Arc<dyn Processor<P>>) {
        match self.inner.processor.write() {
            Ok(mut slot) => *slot = Some(processor),
            Err(poisoned) => *poisoned.into_inner() = Some(processor),
        }

        if self.inner.config.auto_process
            && self.inner.initialized.load(Ordering::SeqCst)
            && !self.is_processing()
        {
            self.start_processing();
        }
    }

    /// Run one dispatch pass now.
    ///
    /// Claims up to `limit` ready items (default `concurrency`), runs them
    /// concurrently and waits for all of them. Returns how many succeeded.
    pub async fn process_next(&self, limit: Option<usize>) -> Result<usize> {
        self.ensure_init()?;
        if self.inner.processor().is_none() {
            return Err(QueueError::ProcessorNotSet);
        }
        if !self.is_online() {
            return Err(QueueError::NetworkOffline);
        }

        let limit = limit.unwrap_or(self.inner.config.concurrency);
        self.inner.dispatch(limit).await
    }

    /// Start the background processing loop. Must run inside a Tokio runtime.
    pub fn start_processing(&self) {
        if self.inner.processing.swap(true, Ordering::SeqCst) {
            return;
        }

        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.inner.worker).replace(token.clone()) {
            previous.cancel();
        }

        tokio::spawn(run_worker(
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.wake),
            token,
            self.inner.config.process_interval(),
        ));
        self.inner.wake.notify_one();

        info!("queue processing started");
        self.inner.events.emit(QueueEvent::ProcessingStarted);
    }

    /// Stop the processing loop and cancel backoff timers.
    ///
    /// Attempts already handed to the processor run to completion.
    pub fn stop_processing(&self) {
        if !self.inner.processing.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(token) = lock(&self.inner.worker).take() {
            token.cancel();
        }
        self.inner.timers.cancel_all();

        info!("queue processing stopped");
        self.inner.events.emit(QueueEvent::ProcessingStopped);
    }

    /// Record a connectivity change. Going online wakes processing.
    pub fn set_online(&self, online: bool) {
        let was = self.inner.online.swap(online, Ordering::SeqCst);
        if was == online {
            return;
        }

        info!(online, "connectivity changed");
        self.inner.events.emit(QueueEvent::ConnectivityChanged { online });

        if online {
            let can_start = self.inner.config.auto_process
                && self.inner.initialized.load(Ordering::SeqCst)
                && self.inner.processor().is_some();
            if can_start && !self.is_processing() {
                self.start_processing();
            } else {
                self.inner.wake.notify_one();
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retry and cleanup
    // ─────────────────────────────────────────────────────────────────────────

    /// Put a failed item back to pending with a fresh retry budget.
    ///
    /// Returns `None` if the item exists but is not failed.
    pub async fn retry(&self, id: &ItemId) -> Result<Option<QueueItem<P>>> {
        self.ensure_init()?;

        let outcome = self
            .inner
            .store
            .update_with(id, |item| {
                if item.status != ItemStatus::Failed {
                    return false;
                }
                if item.transition(ItemStatus::Pending).is_err() {
                    return false;
                }
                item.retry_count = 0;
                item.error = None;
                item.next_attempt_at = None;
                true
            })
            .await?;

        match outcome {
            UpdateOutcome::NotFound => Err(QueueError::ItemNotFound(id.clone())),
            UpdateOutcome::Unchanged(_) => Ok(None),
            UpdateOutcome::Updated(item) => {
                debug!(%id, "failed item requeued");
                self.inner.events.emit(QueueEvent::Retried(item.clone()));
                self.inner.nudge();
                Ok(Some(item))
            }
        }
    }

    /// Retry every failed item. Returns how many were requeued.
    pub async fn retry_all(&self) -> Result<usize> {
        self.ensure_init()?;

        let mut count = 0;
        for item in self.inner.store.get_failed().await {
            if self.retry(&item.id).await?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Remove every item past its expiry that was not delivered.
    pub async fn clean_expired(&self) -> Result<usize> {
        self.ensure_init()?;

        let now = self.inner.clock.now();
        let expired = self.inner.store.expire_due(now).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let ids: Vec<ItemId> = expired.iter().map(|item| item.id.clone()).collect();
        for item in expired {
            self.inner.events.emit(QueueEvent::Expired(item));
        }
        let removed = self.inner.store.remove_many(&ids).await?;

        debug!(count = removed.len(), "expired items removed");
        Ok(removed.len())
    }

    /// Remove every delivered item.
    pub async fn clean_completed(&self) -> Result<usize> {
        self.ensure_init()?;

        let ids: Vec<ItemId> = self
            .inner
            .store
            .by_status(ItemStatus::Success)
            .await
            .into_iter()
            .map(|item| item.id)
            .collect();
        let removed = self.inner.store.remove_many(&ids).await?;

        debug!(count = removed.len(), "completed items removed");
        Ok(removed.len())
    }

    /// Remove one item. Returns false if it was unknown.
    pub async fn remove(&self, id: &ItemId) -> Result<bool> {
        self.ensure_init()?;

        let removed = self.inner.store.remove(id).await?.is_some();
        if removed {
            self.inner.events.emit(QueueEvent::Removed(id.clone()));
        }
        Ok(removed)
    }

    /// Remove every item.
    pub async fn clear(&self) -> Result<usize> {
        self.ensure_init()?;

        let count = self.inner.store.clear().await?;
        info!(count, "queue cleared");
        self.inner.events.emit(QueueEvent::Cleared { count });
        Ok(count)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Get one item.
    pub async fn get(&self, id: &ItemId) -> Option<QueueItem<P>> {
        self.inner.store.get(id).await
    }

    /// Every item in dispatch order.
    pub async fn items(&self) -> Vec<QueueItem<P>> {
        self.inner.store.all().await
    }

    /// Pending items in dispatch order.
    pub async fn pending(&self, limit: Option<usize>) -> Vec<QueueItem<P>> {
        self.inner.store.get_pending(limit).await
    }

    /// Items whose retries are exhausted.
    pub async fn failed(&self) -> Vec<QueueItem<P>> {
        self.inner.store.get_failed().await
    }

    /// Items past their expiry that were not delivered.
    pub async fn expired(&self) -> Vec<QueueItem<P>> {
        self.inner.store.get_expired(self.inner.clock.now()).await
    }

    pub async fn stats(&self) -> QueueStats {
        self.inner.store.stats(self.inner.clock.now()).await
    }

    pub async fn len(&self) -> usize {
        self.inner.store.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.store.is_empty().await
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent<P>> {
        self.inner.events.subscribe()
    }
}

impl<P: Payload> Inner<P> {
    fn processor(&self) -> Option<Arc<dyn Processor<P>>> {
        match self.processor.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Wake the loop if it is running and could make progress.
    fn nudge(&self) {
        if self.processing.load(Ordering::SeqCst) && self.is_online() {
            self.wake.notify_one();
        }
    }

    fn wake_after(&self, delay: Duration) {
        if !self.processing.load(Ordering::SeqCst) {
            return;
        }
        let wake = Arc::clone(&self.wake);
        self.timers.spawn_after(delay, async move { wake.notify_one() });
    }

    /// Claim up to `limit` ready items and deliver them concurrently.
    async fn dispatch(self: &Arc<Self>, limit: usize) -> Result<usize> {
        let processor = self.processor().ok_or(QueueError::ProcessorNotSet)?;

        let claim = self.store.claim_ready(limit, self.clock.now()).await?;
        for item in claim.expired {
            debug!(id = %item.id, "item expired before dispatch");
            self.events.emit(QueueEvent::Expired(item));
        }

        // Detached tasks: dropping this future does not cancel attempts.
        let handles: Vec<_> = claim
            .ready
            .into_iter()
            .map(|item| {
                let inner = Arc::clone(self);
                let processor = Arc::clone(&processor);
                tokio::spawn(async move { inner.attempt(processor.as_ref(), item).await })
            })
            .collect();

        let mut delivered = 0;
        for handle in handles {
            match handle.await {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(e) => error!(error = %e, "delivery task aborted"),
            }
        }
        Ok(delivered)
    }

    async fn attempt(&self, processor: &dyn Processor<P>, item: QueueItem<P>) -> bool {
        debug!(
            id = %item.id,
            kind = item.kind(),
            attempt = item.retry_count + 1,
            "delivering item"
        );
        self.events.emit(QueueEvent::Processing(item.clone()));

        match processor.process(&item).await {
            Ok(result) => {
                self.record_success(&item.id, result).await;
                true
            }
            Err(e) => {
                self.record_failure(&item.id, format!("{:#}", e)).await;
                false
            }
        }
    }

    async fn record_success(&self, id: &ItemId, result: Value) {
        let outcome = self
            .store
            .update_with(id, |item| {
                if item.transition(ItemStatus::Success).is_err() {
                    return false;
                }
                item.error = None;
                item.next_attempt_at = None;
                true
            })
            .await;

        match outcome {
            Ok(UpdateOutcome::Updated(item)) => {
                debug!(%id, "item delivered");
                self.events.emit(QueueEvent::Succeeded { item, result });
            }
            Ok(_) => debug!(%id, "item left the queue while in flight"),
            Err(e) => error!(%id, error = %e, "failed to record delivery"),
        }
    }

    async fn record_failure(&self, id: &ItemId, message: String) {
        let config = &self.config;
        let now = self.clock.now();

        let outcome = self
            .store
            .update_with(id, |item| {
                let retry = item.retry_count < config.max_retries;
                let next = if retry {
                    ItemStatus::Pending
                } else {
                    ItemStatus::Failed
                };
                if item.transition(next).is_err() {
                    return false;
                }

                item.error = Some(message.clone());
                if retry {
                    item.retry_count += 1;
                    let delay =
                        retry_delay(item.retry_count, config.base_delay_ms, config.max_delay_ms);
                    item.next_attempt_at = Some(now.saturating_add(delay.as_millis() as i64));
                } else {
                    item.next_attempt_at = None;
                }
                true
            })
            .await;

        let item = match outcome {
            Ok(UpdateOutcome::Updated(item)) => item,
            Ok(_) => {
                debug!(%id, "failed item left the queue while in flight");
                return;
            }
            Err(e) => {
                error!(%id, error = %e, "failed to record delivery failure");
                return;
            }
        };

        let will_retry = item.status == ItemStatus::Pending;
        if will_retry {
            let delay = retry_delay(item.retry_count, config.base_delay_ms, config.max_delay_ms);
            warn!(
                %id,
                attempt = item.retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "delivery failed, will retry"
            );
            self.events.emit(QueueEvent::Retrying {
                item: item.clone(),
                attempt: item.retry_count,
                delay,
            });
            self.wake_after(delay);
        } else {
            warn!(%id, retries = item.retry_count, error = %message, "delivery failed permanently");
        }

        self.events.emit(QueueEvent::Error {
            item,
            error: message,
            will_retry,
        });
    }
}

impl<P: Payload> Drop for Inner<P> {
    fn drop(&mut self) {
        if let Some(token) = lock(&self.worker).take() {
            token.cancel();
        }
        self.timers.cancel_all();
    }
}

/// The processing loop.
///
/// Sleeps until woken, then runs passes every `interval` while pending work
/// remains and the queue is online. Holds only a weak handle so an abandoned
/// queue can be dropped.
async fn run_worker<P: Payload>(
    queue: Weak<Inner<P>>,
    wake: Arc<Notify>,
    token: CancellationToken,
    interval: Duration,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = wake.notified() => {}
        }

        loop {
            let Some(inner) = queue.upgrade() else {
                return;
            };
            if !inner.is_online() {
                break;
            }

            if let Err(e) = inner.dispatch(inner.config.concurrency).await {
                warn!(error = %e, "processing pass failed");
            }
            let more = inner.store.has_pending().await;
            drop(inner);

            if !more || token.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
                _ = wake.notified() => {}
            }
        }
    }
    debug!("processing loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use courier_core::{ChatAction, ManualClock};
    use courier_store::MemoryKvStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Instant;

    fn action(n: u32) -> ChatAction {
        ChatAction::SendMessage {
            chat_id: "c1".into(),
            content: format!("message {}", n),
            reply_to: None,
        }
    }

    fn manual() -> QueueConfig {
        QueueConfig {
            auto_process: false,
            base_delay_ms: 0,
            ..QueueConfig::default()
        }
    }

    /// Fails the first `fail_first` calls, then succeeds.
    struct Flaky {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl Flaky {
        fn new(fail_first: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_first,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Processor<ChatAction> for Flaky {
        async fn process(&self, item: &QueueItem<ChatAction>) -> anyhow::Result<Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                anyhow::bail!("attempt {} refused", n);
            }
            Ok(json!({ "id": item.id.as_str() }))
        }
    }

    /// Milliseconds on Tokio's clock, so paused-time tests see backoff elapse.
    struct TokioClock {
        start: Instant,
    }

    impl Clock for TokioClock {
        fn now(&self) -> i64 {
            1_000 + self.start.elapsed().as_millis() as i64
        }
    }

    async fn queue_with(
        config: QueueConfig,
    ) -> (OfflineQueue<ChatAction>, Arc<MemoryKvStore>, Arc<ManualClock>) {
        let kv = Arc::new(MemoryKvStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = OfflineQueue::with_clock(kv.clone(), config, clock.clone());
        queue.init().await.unwrap();
        (queue, kv, clock)
    }

    async fn wait_for(
        rx: &mut broadcast::Receiver<QueueEvent<ChatAction>>,
        done: impl Fn(&QueueEvent<ChatAction>) -> bool,
    ) -> Vec<QueueEvent<ChatAction>> {
        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(120), async {
            loop {
                let event = rx.recv().await.unwrap();
                let finished = done(&event);
                seen.push(event);
                if finished {
                    break;
                }
            }
        })
        .await
        .expect("event not observed");
        seen
    }

    #[tokio::test]
    async fn test_operations_require_init() {
        let queue = OfflineQueue::<ChatAction>::new(Arc::new(MemoryKvStore::new()), manual());

        assert_eq!(queue.add(action(1)).await.unwrap_err().code(), "NOT_INITIALIZED");
        assert_eq!(queue.process_next(None).await.unwrap_err().code(), "NOT_INITIALIZED");
        assert_eq!(queue.clear().await.unwrap_err().code(), "NOT_INITIALIZED");
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_persisting() {
        let config = QueueConfig {
            max_queue_size: 2,
            ..manual()
        };
        let (queue, kv, _) = queue_with(config).await;
        let mut rx = queue.subscribe();

        queue.add(action(1)).await.unwrap();
        queue.add(action(2)).await.unwrap();
        let err = queue
            .add(NewItem::new(action(3)).priority(Priority::Critical))
            .await
            .unwrap_err();

        assert!(matches!(err, QueueError::QueueFull { max: 2 }));
        assert_eq!(queue.len().await, 2);
        assert_eq!(kv.len(), 2);

        let mut rejected = 0;
        while let Ok(event) = rx.try_recv() {
            if let QueueEvent::Rejected { item, .. } = event {
                assert_eq!(item.priority, Priority::Critical);
                rejected += 1;
            }
        }
        assert_eq!(rejected, 1);
    }

    #[tokio::test]
    async fn test_add_many_stops_when_full() {
        let config = QueueConfig {
            max_queue_size: 3,
            ..manual()
        };
        let (queue, _, _) = queue_with(config).await;

        let accepted = queue.add_many((0..5).map(action)).await.unwrap();
        assert_eq!(accepted.len(), 3);
        assert_eq!(queue.len().await, 3);
    }

    #[tokio::test]
    async fn test_process_next_preconditions() {
        let (queue, _, _) = queue_with(manual()).await;
        queue.add(action(1)).await.unwrap();

        assert!(matches!(
            queue.process_next(None).await,
            Err(QueueError::ProcessorNotSet)
        ));

        queue.set_processor_arc(Flaky::new(0));
        queue.set_online(false);
        assert!(matches!(
            queue.process_next(None).await,
            Err(QueueError::NetworkOffline)
        ));

        queue.set_online(true);
        assert_eq!(queue.process_next(None).await.unwrap(), 1);
        assert_eq!(queue.stats().await.success, 1);
    }

    #[tokio::test]
    async fn test_retries_exhaust_then_fail() {
        let (queue, _, _) = queue_with(manual()).await;
        let flaky = Flaky::new(usize::MAX);
        queue.set_processor_arc(flaky.clone());
        let item = queue.add(action(1)).await.unwrap();

        for attempt in 1..=3u32 {
            assert_eq!(queue.process_next(None).await.unwrap(), 0);
            let current = queue.get(&item.id).await.unwrap();
            assert_eq!(current.status, ItemStatus::Pending);
            assert_eq!(current.retry_count, attempt);
        }

        assert_eq!(queue.process_next(None).await.unwrap(), 0);
        let failed = queue.get(&item.id).await.unwrap();
        assert_eq!(failed.status, ItemStatus::Failed);
        assert_eq!(failed.retry_count, 3);
        assert_eq!(failed.error.as_deref(), Some("attempt 4 refused"));
        assert_eq!(flaky.calls(), 4);

        // Failed items are never dispatched again on their own
        assert_eq!(queue.process_next(None).await.unwrap(), 0);
        assert_eq!(flaky.calls(), 4);
        assert_eq!(queue.failed().await.len(), 1);
    }

    #[tokio::test]
    async fn test_backoff_gates_redispatch() {
        let config = QueueConfig {
            base_delay_ms: 1_000,
            ..manual()
        };
        let (queue, _, clock) = queue_with(config).await;
        let flaky = Flaky::new(1);
        queue.set_processor_arc(flaky.clone());
        let item = queue.add(action(1)).await.unwrap();

        queue.process_next(None).await.unwrap();
        let waiting = queue.get(&item.id).await.unwrap();
        assert_eq!(waiting.next_attempt_at, Some(2_000));

        assert_eq!(queue.process_next(None).await.unwrap(), 0);
        assert_eq!(flaky.calls(), 1);

        clock.advance(1_000);
        assert_eq!(queue.process_next(None).await.unwrap(), 1);
        assert_eq!(queue.get(&item.id).await.unwrap().status, ItemStatus::Success);
    }

    #[tokio::test]
    async fn test_failure_events_report_retry_and_capped_delay() {
        let config = QueueConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 1_500,
            max_retries: 2,
            ..manual()
        };
        let (queue, _, clock) = queue_with(config).await;
        queue.set_processor_arc(Flaky::new(usize::MAX));
        let item = queue.add(action(1)).await.unwrap();
        let mut rx = queue.subscribe();

        for wait in [1_000, 1_500, 0] {
            assert_eq!(queue.process_next(None).await.unwrap(), 0);
            clock.advance(wait);
        }
        assert_eq!(queue.get(&item.id).await.unwrap().status, ItemStatus::Failed);

        let mut retrying = Vec::new();
        let mut will_retry = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                QueueEvent::Retrying { attempt, delay, .. } => retrying.push((attempt, delay)),
                QueueEvent::Error {
                    will_retry: retry, ..
                } => will_retry.push(retry),
                _ => {}
            }
        }

        // Doubling from the base, then held at the ceiling
        assert_eq!(
            retrying,
            vec![
                (1, Duration::from_millis(1_000)),
                (2, Duration::from_millis(1_500)),
            ]
        );
        assert_eq!(will_retry, vec![true, true, false]);
    }

    #[tokio::test]
    async fn test_retry_resets_failed_item() {
        let config = QueueConfig {
            max_retries: 0,
            ..manual()
        };
        let (queue, _, _) = queue_with(config).await;
        queue.set_processor_arc(Flaky::new(1));
        let item = queue.add(action(1)).await.unwrap();

        queue.process_next(None).await.unwrap();
        assert_eq!(queue.get(&item.id).await.unwrap().status, ItemStatus::Failed);

        let retried = queue.retry(&item.id).await.unwrap().unwrap();
        assert_eq!(retried.status, ItemStatus::Pending);
        assert_eq!(retried.retry_count, 0);
        assert!(retried.error.is_none());

        assert!(queue.retry(&item.id).await.unwrap().is_none());
        assert!(matches!(
            queue.retry(&ItemId::new("ghost")).await,
            Err(QueueError::ItemNotFound(_))
        ));

        assert_eq!(queue.process_next(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retry_all_counts_requeued() {
        let config = QueueConfig {
            max_retries: 0,
            ..manual()
        };
        let (queue, _, _) = queue_with(config).await;
        queue.set_processor_arc(Flaky::new(2));
        queue.add(action(1)).await.unwrap();
        queue.add(action(2)).await.unwrap();

        queue.process_next(None).await.unwrap();
        assert_eq!(queue.failed().await.len(), 2);
        assert_eq!(queue.retry_all().await.unwrap(), 2);
        assert_eq!(queue.stats().await.pending, 2);
    }

    #[tokio::test]
    async fn test_dispatch_follows_priority() {
        let (queue, _, _) = queue_with(manual()).await;
        queue.set_processor_arc(Flaky::new(0));

        let low = queue
            .add(NewItem::new(action(1)).priority(Priority::Low))
            .await
            .unwrap();
        let critical = queue
            .add(NewItem::new(action(2)).priority(Priority::Critical))
            .await
            .unwrap();

        assert_eq!(queue.process_next(Some(1)).await.unwrap(), 1);
        assert_eq!(queue.get(&critical.id).await.unwrap().status, ItemStatus::Success);
        assert_eq!(queue.get(&low.id).await.unwrap().status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn test_clean_expired_and_completed() {
        let (queue, _, clock) = queue_with(manual()).await;
        queue.set_processor_arc(Flaky::new(0));

        let delivered = queue.add(NewItem::new(action(1)).ttl_ms(100)).await.unwrap();
        let stale = queue.add(NewItem::new(action(2)).ttl_ms(100)).await.unwrap();
        queue.process_next(Some(1)).await.unwrap();

        clock.advance(200);
        assert_eq!(queue.stats().await.expired, 1);
        assert_eq!(queue.expired().await[0].id, stale.id);

        assert_eq!(queue.clean_expired().await.unwrap(), 1);
        assert!(queue.get(&stale.id).await.is_none());
        assert_eq!(queue.get(&delivered.id).await.unwrap().status, ItemStatus::Success);

        assert_eq!(queue.clean_completed().await.unwrap(), 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_init_recovers_interrupted_sends() {
        let kv = Arc::new(MemoryKvStore::new());
        {
            let store: ItemStore<ChatAction> = ItemStore::new(kv.clone(), "offline_queue:");
            store
                .add(QueueItem::new(action(1), Priority::Normal, 0))
                .await
                .unwrap();
            store.claim_ready(1, 0).await.unwrap();
        }

        let queue = OfflineQueue::<ChatAction>::new(kv, manual());
        let report = queue.init().await.unwrap();

        assert_eq!(report.recovered, 1);
        assert_eq!(queue.stats().await.pending, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bounds_a_pass() {
        struct Slow {
            in_flight: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait]
        impl Processor<ChatAction> for Slow {
            async fn process(&self, _item: &QueueItem<ChatAction>) -> anyhow::Result<Value> {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }

        let config = QueueConfig {
            concurrency: 2,
            ..manual()
        };
        let (queue, _, _) = queue_with(config).await;
        let slow = Arc::new(Slow {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        queue.set_processor_arc(slow.clone());
        queue.add_many((0..5).map(action)).await.unwrap();

        assert_eq!(queue.process_next(None).await.unwrap(), 2);
        assert_eq!(slow.peak.load(Ordering::SeqCst), 2);
        assert_eq!(queue.stats().await.pending, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_processing_retries_with_backoff() {
        let config = QueueConfig {
            base_delay_ms: 1_000,
            ..QueueConfig::default()
        };
        let kv = Arc::new(MemoryKvStore::new());
        let clock = Arc::new(TokioClock {
            start: Instant::now(),
        });
        let queue = OfflineQueue::<ChatAction>::with_clock(kv, config, clock);
        queue.init().await.unwrap();
        let mut rx = queue.subscribe();

        let flaky = Flaky::new(2);
        queue.set_processor_arc(flaky.clone());
        assert!(queue.is_processing());
        queue.add(action(1)).await.unwrap();

        let seen = wait_for(&mut rx, |e| matches!(e, QueueEvent::Succeeded { .. })).await;
        let delays: Vec<Duration> = seen
            .iter()
            .filter_map(|e| match e {
                QueueEvent::Retrying { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect();

        assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert_eq!(flaky.calls(), 3);
        queue.shutdown();
        assert!(!queue.is_processing());
    }

    /// Counts reads; every processing pass reads the clock once.
    struct CountingClock {
        inner: TokioClock,
        reads: AtomicUsize,
    }

    impl CountingClock {
        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl Clock for CountingClock {
        fn now(&self) -> i64 {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.now()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_loop_parks_until_woken() {
        let config = QueueConfig {
            process_interval_ms: 100,
            ..QueueConfig::default()
        };
        let clock = Arc::new(CountingClock {
            inner: TokioClock {
                start: Instant::now(),
            },
            reads: AtomicUsize::new(0),
        });
        let queue = OfflineQueue::<ChatAction>::with_clock(
            Arc::new(MemoryKvStore::new()),
            config,
            clock.clone(),
        );
        queue.init().await.unwrap();
        let mut rx = queue.subscribe();

        let flaky = Flaky::new(0);
        queue.set_processor_arc(flaky.clone());
        queue.add(action(1)).await.unwrap();
        wait_for(&mut rx, |e| matches!(e, QueueEvent::Succeeded { .. })).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let reads = clock.reads();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(clock.reads(), reads);
        assert_eq!(flaky.calls(), 1);
        assert!(rx.try_recv().is_err());
        assert!(queue.is_processing());

        queue.add(action(2)).await.unwrap();
        wait_for(&mut rx, |e| matches!(e, QueueEvent::Succeeded { .. })).await;
        assert_eq!(flaky.calls(), 2);
        assert!(clock.reads() > reads + 1);
        queue.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_items_wait_for_reconnect() {
        let kv = Arc::new(MemoryKvStore::new());
        let queue = OfflineQueue::<ChatAction>::new(kv, QueueConfig::default());
        queue.init().await.unwrap();
        let mut rx = queue.subscribe();

        queue.set_online(false);
        let flaky = Flaky::new(0);
        queue.set_processor_arc(flaky.clone());
        queue.add(action(1)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(flaky.calls(), 0);
        assert_eq!(queue.stats().await.pending, 1);

        queue.set_online(true);
        wait_for(&mut rx, |e| matches!(e, QueueEvent::Succeeded { .. })).await;
        assert_eq!(flaky.calls(), 1);
    }
}
