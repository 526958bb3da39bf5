//! A sync transport that replays canned responses.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use courier_sync::{Result, SyncError, SyncRequest, SyncResponse, SyncTransport};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One recorded round trip.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request: SyncRequest,
    pub started: Instant,
    pub resolved: Option<Instant>,
}

#[derive(Default)]
struct Script {
    responses: Mutex<VecDeque<Result<SyncResponse<Value>>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    latency: Mutex<Duration>,
}

/// Transport that answers from a queue of scripted outcomes.
///
/// Once the script runs out every request gets an empty response. Clones
/// share one script, so a test can keep a handle after giving one to a
/// manager.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every request this long before answering.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.script.latency) = latency;
    }

    pub fn push_ok(&self, response: SyncResponse<Value>) {
        lock(&self.script.responses).push_back(Ok(response));
    }

    pub fn push_err(&self, error: SyncError) {
        lock(&self.script.responses).push_back(Err(error));
    }

    /// Every request received, in order.
    pub fn recorded(&self) -> Vec<RecordedRequest> {
        lock(&self.script.requests).clone()
    }

    pub fn requests(&self) -> Vec<SyncRequest> {
        self.recorded().into_iter().map(|r| r.request).collect()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.script.requests).len()
    }
}

#[async_trait]
impl SyncTransport for ScriptedTransport {
    type Item = Value;

    async fn request_sync(&self, request: SyncRequest) -> Result<SyncResponse<Value>> {
        let index = {
            let mut requests = lock(&self.script.requests);
            requests.push(RecordedRequest {
                request,
                started: Instant::now(),
                resolved: None,
            });
            requests.len() - 1
        };

        let latency = *lock(&self.script.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(recorded) = lock(&self.script.requests).get_mut(index) {
            recorded.resolved = Some(Instant::now());
        }
        let next = lock(&self.script.responses).pop_front();
        next.unwrap_or_else(|| Ok(SyncResponse::default()))
    }
}

/// A response carrying one `{ "id": .. }` record per id.
pub fn messages(ids: &[&str]) -> SyncResponse<Value> {
    SyncResponse::with_items(ids.iter().map(|id| json!({ "id": id })).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_script_then_answers_empty() {
        let transport = ScriptedTransport::new();
        transport.push_err(SyncError::Timeout);
        transport.push_ok(messages(&["m1"]));

        let request = SyncRequest {
            strategy: None,
            limit: 10,
            cursor: None,
            timestamp: 0,
            chat_id: None,
            include_deleted: false,
            priority: None,
        };

        assert!(transport.request_sync(request.clone()).await.is_err());
        let ok = transport.request_sync(request.clone()).await.unwrap();
        assert_eq!(ok.into_records().len(), 1);
        let empty = transport.request_sync(request).await.unwrap();
        assert!(empty.into_records().is_empty());

        let recorded = transport.recorded();
        assert_eq!(recorded.len(), 3);
        assert!(recorded.iter().all(|r| r.resolved.is_some()));
    }
}
