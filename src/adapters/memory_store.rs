//! In-memory Shared Store
//!
//! Process-local implementation of the `SharedStore` port. Used in tests
//! and for running several cores against one store inside a single
//! process. Expiry is enforced on access.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::domain::ports::SharedStore;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct StoredValue {
    data: Bytes,
    expires_at: Instant,
}

impl StoredValue {
    fn new(data: Bytes, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryStoreStats {
    /// Live keys (expired keys not yet purged included)
    pub keys: usize,
    /// `get` calls
    pub reads: u64,
    /// `set` calls
    pub writes: u64,
    /// `set_if_absent` + `compare_and_delete` calls
    pub lock_ops: u64,
}

/// In-memory `SharedStore` backed by DashMap.
///
/// `set_if_absent` and `compare_and_delete` go through DashMap's entry and
/// `remove_if` APIs, so each holds the shard lock for the whole
/// check-then-write.
#[derive(Debug, Default)]
pub struct InMemorySharedStore {
    values: DashMap<String, StoredValue>,
    reads: AtomicU64,
    writes: AtomicU64,
    lock_ops: AtomicU64,
    /// When set, every call fails with `StoreUnavailable`
    offline: AtomicBool,
}

impl InMemorySharedStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store becoming unreachable (or reachable again).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Raw value currently stored under `key`, ignoring expiry.
    pub fn peek(&self, key: &str) -> Option<Bytes> {
        self.values.get(key).map(|v| v.data.clone())
    }

    /// Drop a key regardless of its value.
    pub fn remove(&self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    pub fn stats(&self) -> InMemoryStoreStats {
        InMemoryStoreStats {
            keys: self.values.len(),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            lock_ops: self.lock_ops.load(Ordering::Relaxed),
        }
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(Error::StoreUnavailable("in-memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SharedStore for InMemorySharedStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.check_online()?;

        if let Some(value) = self.values.get(key) {
            if !value.is_expired() {
                return Ok(Some(value.data.clone()));
            }
        }
        self.values.remove_if(key, |_, v| v.is_expired());
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.check_online()?;

        self.values
            .insert(key.to_string(), StoredValue::new(value, ttl));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        self.lock_ops.fetch_add(1, Ordering::Relaxed);
        self.check_online()?;

        let fresh = StoredValue::new(Bytes::copy_from_slice(token.as_bytes()), ttl);
        match self.values.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(fresh);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool> {
        self.lock_ops.fetch_add(1, Ordering::Relaxed);
        self.check_online()?;

        let removed = self
            .values
            .remove_if(key, |_, v| !v.is_expired() && v.data.as_ref() == token.as_bytes());
        Ok(removed.is_some())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get() {
        let store = InMemorySharedStore::new();

        store
            .set("dex:abc", Bytes::from_static(b"payload"), Duration::from_secs(60))
            .await
            .unwrap();

        let value = store.get("dex:abc").await.unwrap();
        assert_eq!(value, Some(Bytes::from_static(b"payload")));
        assert_eq!(store.stats().reads, 1);
        assert_eq!(store.stats().writes, 1);
    }

    #[tokio::test]
    async fn test_expired_value_is_absent() {
        let store = InMemorySharedStore::new();

        store
            .set("k", Bytes::from_static(b"v"), Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.stats().keys, 0);
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let store = InMemorySharedStore::new();
        let ttl = Duration::from_secs(30);

        assert!(store.set_if_absent("lock:r", "t1", ttl).await.unwrap());
        assert!(!store.set_if_absent("lock:r", "t2", ttl).await.unwrap());
        assert_eq!(store.peek("lock:r"), Some(Bytes::from_static(b"t1")));
    }

    #[tokio::test]
    async fn test_set_if_absent_replaces_expired() {
        let store = InMemorySharedStore::new();

        assert!(store
            .set_if_absent("lock:r", "t1", Duration::from_millis(20))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store
            .set_if_absent("lock:r", "t2", Duration::from_secs(30))
            .await
            .unwrap());
        assert_eq!(store.peek("lock:r"), Some(Bytes::from_static(b"t2")));
    }

    #[tokio::test]
    async fn test_compare_and_delete() {
        let store = InMemorySharedStore::new();
        let ttl = Duration::from_secs(30);
        store.set_if_absent("lock:r", "owner", ttl).await.unwrap();

        assert!(!store.compare_and_delete("lock:r", "intruder").await.unwrap());
        assert!(store.peek("lock:r").is_some());

        assert!(store.compare_and_delete("lock:r", "owner").await.unwrap());
        assert!(store.peek("lock:r").is_none());
        assert!(!store.compare_and_delete("lock:r", "owner").await.unwrap());
    }

    #[tokio::test]
    async fn test_offline_store_fails_every_call() {
        let store = InMemorySharedStore::new();
        store.set_offline(true);

        let err = store.get("k").await.unwrap_err();
        assert!(err.is_store_error());
        assert!(store
            .set_if_absent("k", "t", Duration::from_secs(1))
            .await
            .is_err());

        store.set_offline(false);
        assert!(store.get("k").await.unwrap().is_none());
    }
}
