//! # Courier Store
//!
//! Persistence for Courier. Everything durable goes through the [`KvStore`]
//! trait, so the host decides where bytes actually live.
//!
//! ## Key Types
//!
//! - [`KvStore`] - The async key-value persistence contract
//! - [`MemoryKvStore`] - In-memory storage for tests
//! - [`SqliteKvStore`] - SQLite-based persistent storage
//! - [`Namespaced`] - Key prefixing wrapper for sharing one store
//! - [`ItemStore`] - Durable queue item map with crash recovery
//! - [`CursorStore`] - Durable per-scope sync cursors
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use courier_core::{ChatAction, Priority, QueueItem};
//! use courier_store::{ItemStore, SqliteKvStore};
//!
//! async fn example() {
//!     let kv = Arc::new(SqliteKvStore::open("courier.db").unwrap());
//!     let items: ItemStore<ChatAction> = ItemStore::new(kv, "offline_queue:");
//!     items.init().await.unwrap();
//!
//!     let typing = ChatAction::Typing { chat_id: "c1".into(), is_typing: true };
//!     items.add(QueueItem::new(typing, Priority::Low, 0)).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Per-key records**: one key per queue item and per cursor, never a
//!   whole-collection rewrite
//! - **CBOR records**: values are encoded with `ciborium`
//! - **Crash recovery**: items persisted as `sending` come back as `pending`

pub mod codec;
pub mod cursors;
pub mod error;
pub mod items;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use cursors::{CursorStore, DEFAULT_CURSOR_PREFIX};
pub use error::{Result, StoreError};
pub use items::{Claim, ItemStore, LoadReport, UpdateOutcome};
pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;
pub use traits::{KvStore, Namespaced};
