//! SyncManager: runs syncs against a transport and keeps cursors current.
//!
//! One sync runs at a time. Each run gets a generation number and a
//! cancellation token; `abort()` bumps the generation and cancels the token.
//! A run checks both before and after every cursor write, and closes itself
//! under the same lock `abort()` takes. An abort that lands mid-write rolls
//! the write back, so an aborted run leaves the stored cursors as it found
//! them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_core::{Clock, SyncCursor, SystemClock};
use courier_store::{CursorStore, KvStore};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::events::{SyncEvent, SyncProgress, SyncStatus};
use crate::transport::{SyncRecord, SyncRequest, SyncResponse, SyncStrategy, SyncTransport};

/// Parameters of one sync call.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub strategy: SyncStrategy,
    /// Restrict to one conversation. Ignored by priority syncs.
    pub chat_id: Option<String>,
    /// Page size; defaults to `default_limit`.
    pub limit: Option<usize>,
    /// Start from this cursor instead of the stored one (incremental only).
    pub cursor: Option<SyncCursor>,
    pub include_deleted: Option<bool>,
}

impl SyncOptions {
    pub fn new(strategy: SyncStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn chat(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn cursor(mut self, cursor: SyncCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn include_deleted(mut self, include_deleted: bool) -> Self {
        self.include_deleted = Some(include_deleted);
        self
    }
}

/// What a successful sync fetched.
#[derive(Debug, Clone)]
pub struct SyncResult<I> {
    pub strategy: SyncStrategy,
    pub items: Vec<I>,
    pub has_more: bool,
    /// The cursor in effect after the sync.
    pub cursor: SyncCursor,
    /// Requests issued (one per priority batch).
    pub batches: usize,
    pub duration: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─────────────────────────────────────────────────────────────────────────────
// Run control
// ─────────────────────────────────────────────────────────────────────────────

struct RunState {
    generation: u64,
    token: CancellationToken,
}

/// Status and generation, changed together under one lock.
struct Control {
    run: Mutex<RunState>,
    status: watch::Sender<SyncStatus>,
}

impl Control {
    fn new() -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            run: Mutex::new(RunState {
                generation: 0,
                token: CancellationToken::new(),
            }),
            status,
        }
    }

    fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    fn begin(&self) -> Result<Run<'_>> {
        let mut run = lock(&self.run);
        if self.status() != SyncStatus::Idle {
            return Err(SyncError::InProgress);
        }

        run.generation += 1;
        run.token = CancellationToken::new();
        self.status.send_replace(SyncStatus::Syncing);

        Ok(Run {
            control: self,
            generation: run.generation,
            token: run.token.clone(),
            written: Mutex::new(None),
        })
    }

    fn abort(&self) -> bool {
        let mut run = lock(&self.run);
        if self.status() != SyncStatus::Syncing {
            return false;
        }

        run.generation += 1;
        run.token.cancel();
        self.status.send_replace(SyncStatus::Idle);
        true
    }
}

/// Cursor writes made by one run: the value first replaced and the value
/// last written.
struct Written {
    original: SyncCursor,
    last: SyncCursor,
}

/// One sync in progress. Dropping it returns the status to idle unless the
/// run has already been superseded.
struct Run<'a> {
    control: &'a Control,
    generation: u64,
    token: CancellationToken,
    written: Mutex<Option<Written>>,
}

impl Run<'_> {
    /// Close the run as successful. False if it was aborted first.
    ///
    /// Goes idle under the same lock `abort()` takes, so once this returns
    /// true an abort finds nothing to cancel.
    fn finish(&self) -> bool {
        let run = lock(&self.control.run);
        if self.token.is_cancelled() || run.generation != self.generation {
            return false;
        }
        self.control.status.send_replace(SyncStatus::Idle);
        true
    }

    fn record_write(&self, previous: SyncCursor, written: &SyncCursor) {
        let mut slot = lock(&self.written);
        match slot.as_mut() {
            Some(entry) => entry.last = written.clone(),
            None => {
                *slot = Some(Written {
                    original: previous,
                    last: written.clone(),
                })
            }
        }
    }

    fn is_current(&self) -> bool {
        !self.token.is_cancelled() && lock(&self.control.run).generation == self.generation
    }

    fn check(&self) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(SyncError::Aborted)
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(SyncError::Aborted),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

impl Drop for Run<'_> {
    fn drop(&mut self) {
        let run = lock(&self.control.run);
        if run.generation == self.generation {
            self.control.status.send_replace(SyncStatus::Idle);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

struct Inner<T: SyncTransport> {
    transport: T,
    cursors: CursorStore,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    control: Control,
    /// Serializes cursor commits and rollbacks.
    cursor_writes: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SyncEvent>,
    auto: Mutex<Option<CancellationToken>>,
}

/// Orchestrates incremental, full and priority syncs.
///
/// Cheap to clone; clones share one manager.
pub struct SyncManager<T: SyncTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: SyncTransport> Clone for SyncManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: SyncTransport> SyncManager<T> {
    /// Create a manager whose cursors live in `kv`.
    pub fn new(transport: T, kv: Arc<dyn KvStore>, config: SyncConfig) -> Self {
        Self::with_clock(transport, kv, config, Arc::new(SystemClock))
    }

    /// Create a manager with an explicit time source.
    pub fn with_clock(
        transport: T,
        kv: Arc<dyn KvStore>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cursors = CursorStore::with_prefix(kv, &config.cursor_prefix, Arc::clone(&clock));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            inner: Arc::new(Inner {
                transport,
                cursors,
                config,
                clock,
                control: Control::new(),
                cursor_writes: tokio::sync::Mutex::new(()),
                events,
                auto: Mutex::new(None),
            }),
        }
    }

    /// Run one sync.
    ///
    /// Fails with `InProgress` if a sync is already running, and with
    /// `Aborted` if `abort()` is called before it finishes.
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncResult<T::Item>> {
        self.inner.sync(options).await
    }

    /// Fetch changes since the stored cursor.
    pub async fn sync_incremental(&self, chat_id: Option<&str>) -> Result<SyncResult<T::Item>> {
        let mut options = SyncOptions::new(SyncStrategy::Incremental);
        options.chat_id = chat_id.map(str::to_string);
        self.sync(options).await
    }

    /// Fetch from the beginning, replacing the stored cursor.
    ///
    /// The cursor is replaced only once the request succeeds. A full sync
    /// that fails or is aborted keeps the cursor that was stored before.
    pub async fn sync_full(&self, chat_id: Option<&str>) -> Result<SyncResult<T::Item>> {
        let mut options = SyncOptions::new(SyncStrategy::Full);
        options.chat_id = chat_id.map(str::to_string);
        self.sync(options).await
    }

    /// Run every configured priority batch in order.
    pub async fn sync_priority(&self) -> Result<SyncResult<T::Item>> {
        self.sync(SyncOptions::new(SyncStrategy::Priority)).await
    }

    /// Incremental sync of one conversation.
    pub async fn sync_chat(&self, chat_id: &str) -> Result<SyncResult<T::Item>> {
        self.sync_incremental(Some(chat_id)).await
    }

    /// Cancel the running sync, if any. Returns whether one was running.
    ///
    /// The aborted call returns `Aborted`; whatever its request eventually
    /// yields is discarded.
    pub fn abort(&self) -> bool {
        if !self.inner.control.abort() {
            return false;
        }
        info!("sync aborted");
        self.inner.emit(SyncEvent::Aborted);
        true
    }

    /// Run an incremental sync every `interval` (default
    /// `auto_sync_interval_ms`) while no other sync is running.
    ///
    /// Replaces any previous schedule. Must run inside a Tokio runtime.
    pub fn start_auto_sync(&self, interval: Option<Duration>) {
        let interval = interval.unwrap_or_else(|| self.inner.config.auto_sync_interval());
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.inner.auto).replace(token.clone()) {
            previous.cancel();
        }

        let manager = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = manager.upgrade() else {
                    break;
                };
                if inner.control.status() != SyncStatus::Idle {
                    debug!("sync running, skipping auto sync tick");
                    continue;
                }
                if let Err(e) = inner.sync(SyncOptions::default()).await {
                    debug!(error = %e, "auto sync failed");
                }
            }
        });

        info!(interval_ms = interval.as_millis() as u64, "auto sync started");
    }

    /// Cancel the auto sync schedule. A sync it already started runs on.
    pub fn stop_auto_sync(&self) {
        if let Some(token) = lock(&self.inner.auto).take() {
            token.cancel();
            info!("auto sync stopped");
        }
    }

    pub fn is_auto_syncing(&self) -> bool {
        lock(&self.inner.auto).is_some()
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.control.status()
    }

    pub fn is_syncing(&self) -> bool {
        self.status() == SyncStatus::Syncing
    }

    /// Follow status changes.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.control.status.subscribe()
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// The cursor store this manager reads and writes.
    pub fn cursors(&self) -> &CursorStore {
        &self.inner.cursors
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }
}

impl<T: SyncTransport> Inner<T> {
    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    async fn sync(&self, options: SyncOptions) -> Result<SyncResult<T::Item>> {
        let run = self.control.begin()?;
        let started = Instant::now();
        let strategy = options.strategy;

        debug!(strategy = strategy.as_str(), chat_id = ?options.chat_id, "sync started");
        self.emit(SyncEvent::Started {
            strategy,
            chat_id: options.chat_id.clone(),
        });

        let outcome = match strategy {
            SyncStrategy::Priority => self.run_priority(&run, &options).await,
            SyncStrategy::Incremental | SyncStrategy::Full => {
                self.run_single(&run, &options).await
            }
        };
        let outcome = match outcome {
            Ok(_) if !run.finish() => Err(SyncError::Aborted),
            other => other,
        };

        match outcome {
            Ok(mut result) => {
                result.duration = started.elapsed();
                self.emit(SyncEvent::Completed {
                    strategy,
                    count: result.items.len(),
                    duration: result.duration,
                });
                drop(run);

                info!(
                    strategy = strategy.as_str(),
                    count = result.items.len(),
                    has_more = result.has_more,
                    duration_ms = result.duration.as_millis() as u64,
                    "sync completed"
                );
                Ok(result)
            }
            Err(e) => {
                let current = run.is_current();

                if !current {
                    self.rollback(&run).await;
                    drop(run);
                    debug!(strategy = strategy.as_str(), "aborted sync discarded");
                    return Err(SyncError::Aborted);
                }

                drop(run);
                warn!(strategy = strategy.as_str(), error = %e, "sync failed");
                self.emit(SyncEvent::Error {
                    code: e.code(),
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                });
                Err(e)
            }
        }
    }

    async fn run_single(
        &self,
        run: &Run<'_>,
        options: &SyncOptions,
    ) -> Result<SyncResult<T::Item>> {
        let strategy = options.strategy;
        let chat_id = options.chat_id.as_deref();

        let cursor = match (strategy, &options.cursor) {
            (SyncStrategy::Full, _) => empty_cursor(chat_id),
            (_, Some(cursor)) => SyncCursor {
                chat_id: chat_id.map(str::to_string),
                ..cursor.clone()
            },
            (_, None) => self.load_cursor(chat_id).await?,
        };

        let request = SyncRequest {
            strategy: Some(strategy),
            limit: options.limit.unwrap_or(self.config.default_limit),
            cursor: cursor.last_message_id.clone(),
            timestamp: cursor.last_sync_time,
            chat_id: chat_id.map(str::to_string),
            include_deleted: options
                .include_deleted
                .unwrap_or(self.config.include_deleted),
            priority: None,
        };
        let response = self.request_with_retry(run, request).await?;
        run.check()?;

        let has_more = response.has_more;
        let total = response.count;
        let (items, advanced) = self.advance(&cursor, response);

        // A full sync replaces the stored cursor even when nothing came back
        let write = match advanced {
            Some(next) => Some(next),
            None if strategy == SyncStrategy::Full => Some(cursor.clone()),
            None => None,
        };
        let cursor = match write {
            Some(next) => {
                self.commit(run, &next).await?;
                next
            }
            None => cursor,
        };

        let total = total.unwrap_or(items.len()).max(items.len());
        self.emit(SyncEvent::Progress(SyncProgress::of_total(items.len(), total)));

        Ok(SyncResult {
            strategy,
            items,
            has_more,
            cursor,
            batches: 1,
            duration: Duration::ZERO,
        })
    }

    async fn run_priority(
        &self,
        run: &Run<'_>,
        options: &SyncOptions,
    ) -> Result<SyncResult<T::Item>> {
        let batches = &self.config.priority_batches;
        let include_deleted = options
            .include_deleted
            .unwrap_or(self.config.include_deleted);

        let mut items = Vec::new();
        let mut has_more = false;
        let mut cursor = self.cursors.get_global_cursor().await?;

        for (index, batch) in batches.iter().enumerate() {
            if batch.delay_ms > 0 {
                run.sleep(batch.delay()).await?;
            }

            let current = self.cursors.get_global_cursor().await?;
            let request = SyncRequest {
                strategy: Some(SyncStrategy::Priority),
                limit: batch.batch_size,
                cursor: current.last_message_id.clone(),
                timestamp: current.last_sync_time,
                chat_id: None,
                include_deleted,
                priority: Some(batch.priority),
            };
            let response = self.request_with_retry(run, request).await?;
            run.check()?;

            has_more = response.has_more;
            let (batch_items, advanced) = self.advance(&current, response);
            cursor = match advanced {
                Some(next) => {
                    self.commit(run, &next).await?;
                    next
                }
                None => current,
            };

            debug!(index, count = batch_items.len(), has_more, "priority batch synced");
            self.emit(SyncEvent::Batch {
                index,
                count: batch_items.len(),
                has_more,
            });
            items.extend(batch_items);
            self.emit(SyncEvent::Progress(SyncProgress::of_batches(
                items.len(),
                index + 1,
                batches.len(),
            )));
        }

        Ok(SyncResult {
            strategy: SyncStrategy::Priority,
            items,
            has_more,
            cursor,
            batches: batches.len(),
            duration: Duration::ZERO,
        })
    }

    /// Issue `request`, retrying transient failures with linear backoff.
    async fn request_with_retry(
        &self,
        run: &Run<'_>,
        request: SyncRequest,
    ) -> Result<SyncResponse<T::Item>> {
        let attempts = self.config.max_retries.max(1);
        let mut attempt = 1;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = run.token.cancelled() => return Err(SyncError::Aborted),
                outcome = self.transport.request_sync(request.clone()) => outcome,
            };

            match outcome {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.config.retry_delay(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "sync request failed, retrying"
                    );
                    run.sleep(delay).await?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Normalize a response and work out the cursor that follows it.
    ///
    /// There is a next cursor only when items came back: `next_cursor`, or
    /// else the last item's id. With neither the stored one stays.
    fn advance(
        &self,
        cursor: &SyncCursor,
        response: SyncResponse<T::Item>,
    ) -> (Vec<T::Item>, Option<SyncCursor>) {
        let next = response.next_cursor.clone();
        let items = response.into_records();
        if items.is_empty() {
            return (items, None);
        }

        match next.or_else(|| items.last().and_then(SyncRecord::record_id)) {
            Some(id) => {
                let advanced = cursor.advanced(id, self.clock.now());
                (items, Some(advanced))
            }
            None => {
                warn!(count = items.len(), "sync results carry no cursor, keeping the stored one");
                (items, None)
            }
        }
    }

    /// Persist `cursor` on behalf of `run`.
    ///
    /// Fails with `Aborted`, and writes nothing, if the run is stale. A run
    /// aborted while the write was in flight also gets `Aborted`; the sync
    /// then rolls the write back.
    async fn commit(&self, run: &Run<'_>, cursor: &SyncCursor) -> Result<()> {
        let _writes = self.cursor_writes.lock().await;
        run.check()?;

        let previous = self.load_cursor(cursor.chat_id.as_deref()).await?;
        self.save_cursor(cursor).await?;
        run.record_write(previous, cursor);
        run.check()
    }

    /// Restore the cursor an aborted run replaced, unless a later run has
    /// written over it since.
    async fn rollback(&self, run: &Run<'_>) {
        let Some(written) = lock(&run.written).take() else {
            return;
        };

        let _writes = self.cursor_writes.lock().await;
        let scope = written.last.chat_id.as_deref();
        let restored = match self.load_cursor(scope).await {
            Ok(stored) if stored == written.last => self.save_cursor(&written.original).await,
            Ok(_) => return,
            Err(e) => Err(e),
        };
        match restored {
            Ok(()) => debug!(chat_id = ?scope, "aborted sync cursor write rolled back"),
            Err(e) => warn!(chat_id = ?scope, error = %e, "failed to roll back aborted cursor write"),
        }
    }

    async fn save_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        match cursor.chat_id.as_deref() {
            Some(chat_id) => self.cursors.save_chat_cursor(chat_id, cursor).await?,
            None => self.cursors.save_global_cursor(cursor).await?,
        }
        Ok(())
    }

    async fn load_cursor(&self, chat_id: Option<&str>) -> Result<SyncCursor> {
        let cursor = match chat_id {
            Some(chat_id) => self.cursors.get_chat_cursor(chat_id).await?,
            None => self.cursors.get_global_cursor().await?,
        };
        Ok(cursor)
    }
}

impl<T: SyncTransport> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(token) = lock(&self.auto).take() {
            token.cancel();
        }
    }
}

fn empty_cursor(chat_id: Option<&str>) -> SyncCursor {
    match chat_id {
        Some(chat_id) => SyncCursor::for_chat(chat_id),
        None => SyncCursor::empty(),
    }
}
