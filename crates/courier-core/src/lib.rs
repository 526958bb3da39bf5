//! # Courier Core
//!
//! Pure primitives for Courier: queue items, sync cursors, payloads and clocks.
//!
//! This crate contains no I/O, no storage, no networking. Everything here is
//! plain data plus the rules that govern it (status transitions, expiry,
//! ordering).
//!
//! ## Key Types
//!
//! - [`QueueItem`] - One unit of pending outbound work
//! - [`ItemStatus`] - The item state machine
//! - [`Priority`] - Dispatch urgency, lower is more urgent
//! - [`Payload`] - Trait for type-tagged item payloads
//! - [`ChatAction`] - The stock chat payload union
//! - [`SyncCursor`] - A bookmark into a remote message stream
//! - [`Clock`] - Time source, swappable in tests

pub mod cursor;
pub mod error;
pub mod item;
pub mod payload;
pub mod time;
pub mod types;

pub use cursor::SyncCursor;
pub use error::CoreError;
pub use item::{ItemStatus, Priority, QueueItem, QueueStats};
pub use payload::{ChatAction, Payload};
pub use time::{now_millis, Clock, ManualClock, SystemClock};
pub use types::{DedupKey, ItemId};
