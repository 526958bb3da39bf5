//! Cancellable one-shot timers.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A group of delayed tasks that can be cancelled together.
///
/// Each timer gets a child of the current generation token; `cancel_all`
/// cancels the generation and starts a fresh one.
pub(crate) struct Timers {
    generation: Mutex<CancellationToken>,
}

impl Timers {
    pub(crate) fn new() -> Self {
        Self {
            generation: Mutex::new(CancellationToken::new()),
        }
    }

    fn current(&self) -> CancellationToken {
        match self.generation.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Run `task` after `delay` unless cancelled first.
    pub(crate) fn spawn_after<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.current().child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => task.await,
            }
        });
    }

    /// Cancel every outstanding timer.
    pub(crate) fn cancel_all(&self) {
        let mut token = match self.generation.lock() {
            Ok(token) => token,
            Err(poisoned) => poisoned.into_inner(),
        };
        token.cancel();
        *token = CancellationToken::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_stops_pending_timers() {
        let timers = Timers::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        timers.spawn_after(Duration::from_millis(100), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timers.cancel_all();

        let counter = fired.clone();
        timers.spawn_after(Duration::from_millis(100), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
