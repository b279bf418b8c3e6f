//! Shared Tier
//!
//! Cross-process tier over the `SharedStore` port. Its TTL is the freshness
//! bound readers rely on. Store failures degrade to a miss (reads) or a
//! skipped write, never to an error for the caller.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::warn;

use crate::domain::ports::SharedStore;

use super::metrics::CacheMetrics;

pub struct SharedTier {
    store: Arc<dyn SharedStore>,
    ttl: Duration,
    namespace: String,
}

impl SharedTier {
    pub fn new(store: Arc<dyn SharedStore>, ttl: Duration, namespace: impl Into<String>) -> Self {
        Self {
            store,
            ttl,
            namespace: namespace.into(),
        }
    }

    /// Store key for one cache key (`"{namespace}:{key}"`)
    pub fn store_key(&self, key: &str) -> String {
        if self.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.namespace, key)
        }
    }

    pub async fn get(&self, key: &str, metrics: &CacheMetrics) -> Option<Bytes> {
        match self.store.get(&self.store_key(key)).await {
            Ok(value) => value,
            Err(e) => {
                metrics.record_store_error();
                warn!(key, store = self.store.name(), error = %e, "Shared tier read failed, treating as miss");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: Bytes, metrics: &CacheMetrics) {
        if let Err(e) = self.store.set(&self.store_key(key), value, self.ttl).await {
            metrics.record_store_error();
            warn!(key, store = self.store.name(), error = %e, "Shared tier write failed, keeping local copy only");
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }
}

impl std::fmt::Debug for SharedTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTier")
            .field("store", &self.store.name())
            .field("ttl", &self.ttl)
            .field("namespace", &self.namespace)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemorySharedStore;

    #[tokio::test]
    async fn test_namespaced_roundtrip() {
        let store = Arc::new(InMemorySharedStore::new());
        let tier = SharedTier::new(store.clone(), Duration::from_secs(60), "dex");
        let metrics = CacheMetrics::new();

        tier.set("mint", Bytes::from_static(b"v"), &metrics).await;
        assert_eq!(store.peek("dex:mint"), Some(Bytes::from_static(b"v")));
        assert_eq!(tier.get("mint", &metrics).await, Some(Bytes::from_static(b"v")));
        assert_eq!(tier.store_key("x"), "dex:x");
    }

    #[tokio::test]
    async fn test_store_errors_degrade() {
        let store = Arc::new(InMemorySharedStore::new());
        let tier = SharedTier::new(store.clone(), Duration::from_secs(60), "dex");
        let metrics = CacheMetrics::new();
        store.set_offline(true);

        tier.set("mint", Bytes::from_static(b"v"), &metrics).await;
        assert!(tier.get("mint", &metrics).await.is_none());
        assert_eq!(metrics.snapshot().store_errors, 2);
    }
}
