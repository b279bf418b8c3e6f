//! Local Tier
//!
//! Short-TTL, bounded, in-process tier that absorbs bursts within one
//! process. Lost on restart.

use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::trace;

use super::entry::CacheEntry;

/// Bounded in-process tier.
///
/// Reads are lock-free over DashMap shards. Writers are serialized so the
/// entry bound holds exactly.
#[derive(Debug)]
pub struct LocalTier {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
    write_lock: Mutex<()>,
}

impl LocalTier {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            write_lock: Mutex::new(()),
        }
    }

    /// Unexpired value for `key`. Expired entries are dropped on sight.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Some(entry.value().value().clone());
            }
        }
        self.entries.remove_if(key, |_, e| e.is_expired());
        None
    }

    /// True when `key` holds an unexpired entry. Does not purge.
    pub fn is_fresh(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|e| !e.is_expired())
            .unwrap_or(false)
    }

    /// Store `value` with a fresh TTL, replacing any previous entry.
    ///
    /// Returns the number of entries evicted to make room.
    pub fn insert(&self, key: &str, value: Bytes) -> usize {
        let _guard = self.write_lock.lock();
        let mut evicted = 0;

        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            let before = self.entries.len();
            self.entries.retain(|_, e| !e.is_expired());
            evicted += before - self.entries.len();

            while self.entries.len() >= self.max_entries {
                let victim = self
                    .entries
                    .iter()
                    .min_by_key(|e| e.expires_at())
                    .map(|e| e.key().to_string());
                match victim {
                    Some(victim) => {
                        self.entries.remove(&victim);
                        evicted += 1;
                        trace!(key = %victim, "Evicted local entry");
                    }
                    None => break,
                }
            }
        }

        self.entries
            .insert(key.to_string(), CacheEntry::new(key, value, self.ttl));
        evicted
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Entries held, expired ones not yet purged included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_get_insert() {
        let tier = LocalTier::new(Duration::from_secs(30), 10);
        assert!(tier.get("a").is_none());

        tier.insert("a", Bytes::from_static(b"1"));
        assert_eq!(tier.get("a"), Some(Bytes::from_static(b"1")));
        assert!(tier.is_fresh("a"));

        tier.insert("a", Bytes::from_static(b"2"));
        assert_eq!(tier.get("a"), Some(Bytes::from_static(b"2")));
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_dropped() {
        let tier = LocalTier::new(Duration::ZERO, 10);
        tier.insert("a", Bytes::from_static(b"1"));
        assert!(!tier.is_fresh("a"));
        assert!(tier.get("a").is_none());
        assert!(tier.is_empty());
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let tier = LocalTier::new(Duration::from_secs(30), 2);
        tier.insert("a", Bytes::from_static(b"1"));
        std::thread::sleep(Duration::from_millis(2));
        tier.insert("b", Bytes::from_static(b"2"));
        std::thread::sleep(Duration::from_millis(2));

        assert_eq!(tier.insert("c", Bytes::from_static(b"3")), 1);
        assert!(tier.get("a").is_none());
        assert!(tier.get("b").is_some());
        assert!(tier.get("c").is_some());

        // Replacing an existing key never evicts.
        assert_eq!(tier.insert("b", Bytes::from_static(b"4")), 0);
        assert_eq!(tier.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_capacity(
            cap in 1usize..16,
            keys in proptest::collection::vec("[a-z]{1,3}", 0..64),
        ) {
            let tier = LocalTier::new(Duration::from_secs(30), cap);
            for key in &keys {
                tier.insert(key, Bytes::from(key.clone()));
                prop_assert!(tier.len() <= cap);
            }
            if let Some(last) = keys.last() {
                prop_assert!(tier.get(last).is_some());
            }
        }
    }
}
