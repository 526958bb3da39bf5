//! A processor that records every delivery attempt.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use courier_core::{DedupKey, ItemId, Payload, QueueItem};
use courier_queue::Processor;

/// One call to [`RecordingProcessor::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub id: ItemId,
    pub dedup_key: DedupKey,
    pub kind: &'static str,
    /// 1 for the first attempt of an item.
    pub attempt: u32,
    pub succeeded: bool,
}

/// Processor that fails a scripted number of calls and records all of them.
#[derive(Debug)]
pub struct RecordingProcessor {
    attempts: Mutex<Vec<Attempt>>,
    fail_first: usize,
    latency: Duration,
}

impl RecordingProcessor {
    /// Accepts every item.
    pub fn succeeding() -> Self {
        Self::failing_first(0)
    }

    /// Rejects the first `n` calls, then accepts.
    pub fn failing_first(n: usize) -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
            fail_first: n,
            latency: Duration::ZERO,
        }
    }

    /// Rejects every call.
    pub fn always_failing() -> Self {
        Self::failing_first(usize::MAX)
    }

    /// Sleep this long inside each call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn attempts_guard(&self) -> MutexGuard<'_, Vec<Attempt>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every attempt so far, in call order.
    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts_guard().clone()
    }

    pub fn calls(&self) -> usize {
        self.attempts_guard().len()
    }

    /// Ids of successfully delivered items, in completion order.
    pub fn delivered(&self) -> Vec<ItemId> {
        self.attempts_guard()
            .iter()
            .filter(|a| a.succeeded)
            .map(|a| a.id.clone())
            .collect()
    }
}

#[async_trait]
impl<P: Payload> Processor<P> for RecordingProcessor {
    async fn process(&self, item: &QueueItem<P>) -> anyhow::Result<Value> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let succeeded = {
            let mut attempts = self.attempts_guard();
            let succeeded = attempts.len() >= self.fail_first;
            attempts.push(Attempt {
                id: item.id.clone(),
                dedup_key: item.dedup_key.clone(),
                kind: item.kind(),
                attempt: item.retry_count + 1,
                succeeded,
            });
            succeeded
        };

        if !succeeded {
            anyhow::bail!("scripted rejection of {}", item.id);
        }
        Ok(json!({ "id": item.id.as_str(), "dedup_key": item.dedup_key.as_str() }))
    }
}
