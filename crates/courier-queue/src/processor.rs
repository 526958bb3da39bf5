//! The delivery callback.

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use courier_core::{Payload, QueueItem};

/// Delivers one item to the remote side.
///
/// An `Err` counts as a failed attempt and feeds the retry policy. The
/// processor is never cancelled mid-call by the queue.
#[async_trait]
pub trait Processor<P>: Send + Sync {
    /// Attempt delivery, returning the remote result on success.
    async fn process(&self, item: &QueueItem<P>) -> anyhow::Result<Value>;
}

/// A [`Processor`] backed by an async closure.
pub struct FnProcessor<F> {
    f: F,
}

/// Wrap an async closure as a [`Processor`].
///
/// ```ignore
/// queue.set_processor(processor_fn(|item: QueueItem<ChatAction>| async move {
///     api.send(&item.payload).await
/// }));
/// ```
pub fn processor_fn<F>(f: F) -> FnProcessor<F> {
    FnProcessor { f }
}

#[async_trait]
impl<P, F, Fut> Processor<P> for FnProcessor<F>
where
    P: Payload,
    F: Fn(QueueItem<P>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn process(&self, item: &QueueItem<P>) -> anyhow::Result<Value> {
        (self.f)(item.clone()).await
    }
}
