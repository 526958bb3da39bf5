//! # Courier Queue
//!
//! A persistent priority queue for outbound work that must survive being
//! offline and being restarted.
//!
//! ## Overview
//!
//! - Items are persisted through a [`KvStore`](courier_store::KvStore) the
//!   moment they are added.
//! - Dispatch order is priority first, then creation time, then insertion.
//! - A registered [`Processor`] delivers items; failures are retried with
//!   exponential backoff, then parked as `failed`.
//! - A background loop processes automatically while online.
//! - Every state change is published as a [`QueueEvent`].
//!
//! ```ignore
//! let queue = OfflineQueue::new(kv, QueueConfig::default());
//! queue.init().await?;
//! queue.set_processor(processor_fn(|item: QueueItem<ChatAction>| async move {
//!     api.deliver(&item).await
//! }));
//! queue.add(NewItem::new(action).priority(Priority::High)).await?;
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod events;
pub mod processor;
pub mod queue;
mod timers;

pub use backoff::retry_delay;
pub use config::QueueConfig;
pub use error::{QueueError, Result};
pub use events::QueueEvent;
pub use processor::{processor_fn, FnProcessor, Processor};
pub use queue::{NewItem, OfflineQueue};
