//! Strong identifier types for Courier.
//!
//! Identifiers are newtypes so an item id can never be passed where a dedup
//! key is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

use rand::Rng;

/// Unique identifier of a queue item.
///
/// Generated ids have the form `{created_ms:x}-{16 random hex chars}`, so they
/// sort roughly by creation time when compared as strings.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Wrap an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id for an item created at `created_at` (Unix ms).
    pub fn generate(created_at: i64) -> Self {
        let suffix: [u8; 8] = rand::thread_rng().gen();
        Self(format!("{:x}-{}", created_at.max(0), hex::encode(suffix)))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Client-generated idempotency key carried by every queue item.
///
/// Assigned once when the item is created and never changed, so a processor
/// that forwards it to the remote side lets the server drop the duplicate
/// delivery that crash recovery can cause.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    /// Generate a random 128-bit key, hex encoded.
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self(hex::encode(bytes))
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DedupKey({})", self.0)
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
