//! KvStore trait: the persistence collaborator.
//!
//! Both the item store and the cursor store depend only on this minimal
//! contract, so the host application can back Courier with whatever durable
//! key-value storage it already has.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Async key-value persistence.
///
/// Keys are UTF-8 strings; values are opaque bytes. Implementations must be
/// safe to share between tasks.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Bytes) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, in lexicographic order.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove several keys at once.
    async fn remove_many(&self, keys: &[String]) -> Result<()>;
}

#[async_trait]
impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).keys(prefix).await
    }

    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        (**self).remove_many(keys).await
    }
}

/// Wraps a store and confines every key to `"{namespace}:"`.
///
/// Lets several Courier instances (one per account, say) share a single
/// physical store without seeing each other's keys.
pub struct Namespaced<S> {
    inner: S,
    prefix: String,
}

impl<S: KvStore> Namespaced<S> {
    /// Confine `inner` to `namespace`.
    pub fn new(inner: S, namespace: &str) -> Self {
        Self {
            inner,
            prefix: format!("{}:", namespace),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl<S: KvStore> KvStore for Namespaced<S> {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.inner.get(&self.scoped(key)).await
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.inner.set(&self.scoped(key), value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(&self.scoped(key)).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let keys = self.inner.keys(&self.scoped(prefix)).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(String::from))
            .collect())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        let scoped: Vec<String> = keys.iter().map(|k| self.scoped(k)).collect();
        self.inner.remove_many(&scoped).await
    }
}
