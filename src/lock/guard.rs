//! Resource Edit Guard
//!
//! Makes "re-render this message" style operations single-flight per
//! resource. Entry first claims an in-process slot, then the distributed
//! lock:
//!
//! ```text
//!   try_enter(key)
//!      │
//!      ├─ local slot taken (and not stale) ──────────────► busy
//!      │
//!      └─ claim slot ─► DistributedLock::try_acquire
//!                           ├─ acquired ──► keep slot ──────► EditEntry
//!                           ├─ held ──────► free slot ──────► busy
//!                           └─ store down ► keep slot ──────► EditEntry (fallback)
//! ```
//!
//! Every claimed slot gets a fresh generation, and `exit` only frees the
//! slot and lock token recorded in its own `EditEntry`.
//!
//! The fallback branch favours availability of the edit path over strict
//! cross-process exclusion: while the store is down, only callers inside
//! this process are excluded from each other.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::ports::{LockToken, ResourceKey, SharedStore};

use super::distributed::DistributedLock;

/// Edit guard configuration
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Expiry of distributed locks and of abandoned local slots
    pub lock_ttl: Duration,

    /// Prefix for lock keys in the shared store
    pub lock_namespace: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30),
            lock_namespace: "lock".to_string(),
        }
    }
}

/// How a granted entry is held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryMode {
    /// Local slot plus distributed lock
    Distributed,
    /// Local slot only, no shared store configured
    LocalOnly,
    /// Local slot only, shared store unreachable at entry
    Fallback,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    mode: EntryMode,
    taken_at: Instant,
}

/// Proof of a granted entry, handed back to [`ResourceEditGuard::exit`].
///
/// The generation ties the entry to the slot it claimed. If the slot was
/// taken over after going stale, exiting this entry leaves the new holder
/// untouched.
#[derive(Debug)]
#[must_use = "a granted entry must be passed to `exit`"]
pub struct EditEntry {
    key: ResourceKey,
    generation: u64,
    token: Option<LockToken>,
    mode: EntryMode,
}

impl EditEntry {
    pub fn resource(&self) -> &ResourceKey {
        &self.key
    }

    pub fn mode(&self) -> EntryMode {
        self.mode
    }
}

/// Guard statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct GuardStats {
    pub granted: u64,
    pub busy: u64,
    pub fallback: u64,
    pub held: usize,
}

/// Per-resource single-flight guard.
pub struct ResourceEditGuard {
    config: GuardConfig,
    lock: Option<DistributedLock>,
    slots: DashMap<ResourceKey, Slot>,
    next_generation: AtomicU64,
    granted: AtomicU64,
    busy: AtomicU64,
    fallback: AtomicU64,
}

impl ResourceEditGuard {
    /// Create a guard. Without a shared store it excludes within this
    /// process only.
    pub fn new(config: GuardConfig, store: Option<Arc<dyn SharedStore>>) -> Self {
        let lock = store.map(|store| DistributedLock::new(store, config.lock_namespace.clone()));
        Self {
            config,
            lock,
            slots: DashMap::new(),
            next_generation: AtomicU64::new(1),
            granted: AtomicU64::new(0),
            busy: AtomicU64::new(0),
            fallback: AtomicU64::new(0),
        }
    }

    /// Try to become the only editor of `key`.
    ///
    /// `None` means someone else is already handling the resource; the
    /// caller should acknowledge and return without doing the work. A
    /// granted entry must be passed to [`exit`](Self::exit) on every path.
    pub async fn try_enter(&self, key: &ResourceKey) -> Option<EditEntry> {
        let Some(generation) = self.claim_slot(key) else {
            self.busy.fetch_add(1, Ordering::Relaxed);
            debug!(resource = %key, "Resource busy in this process");
            return None;
        };

        let Some(lock) = &self.lock else {
            return self.grant(key, generation, None, EntryMode::LocalOnly);
        };

        match lock.try_acquire(key, self.config.lock_ttl).await {
            Ok(Some(lease)) => {
                let token = lease.token().clone();
                let entry = self.grant(key, generation, Some(token.clone()), EntryMode::Distributed);
                if entry.is_none() {
                    lock.release(key, &token).await;
                }
                entry
            }
            Ok(None) => {
                self.slots.remove_if(key, |_, slot| slot.generation == generation);
                self.busy.fetch_add(1, Ordering::Relaxed);
                debug!(resource = %key, "Resource busy in another process");
                None
            }
            Err(e) => {
                let entry = self.grant(key, generation, None, EntryMode::Fallback);
                if entry.is_some() {
                    self.fallback.fetch_add(1, Ordering::Relaxed);
                    warn!(resource = %key, error = %e, "Lock store unavailable, using local exclusion only");
                }
                entry
            }
        }
    }

    /// Release what `entry` was granted. Returns `false` if its slot had
    /// already been taken over, in which case the current holder keeps
    /// both its slot and its distributed lock.
    pub async fn exit(&self, entry: EditEntry) -> bool {
        let removed = self
            .slots
            .remove_if(&entry.key, |_, slot| slot.generation == entry.generation)
            .is_some();
        if !removed {
            warn!(resource = %entry.key, "Edit slot was taken over before exit");
        }

        if let (Some(lock), Some(token)) = (&self.lock, &entry.token) {
            if !lock.release(&entry.key, token).await {
                // Expired or store down; the record times out on its own.
                debug!(resource = %entry.key, "Distributed lock was not released");
            }
        }
        removed
    }

    /// Run `work` while holding `key`. `None` means the resource was busy
    /// and `work` was not run. The guard is exited even if `work` panics.
    pub async fn run_exclusive<F, T>(&self, key: &ResourceKey, work: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let entry = self.try_enter(key).await?;

        let outcome = AssertUnwindSafe(work).catch_unwind().await;
        self.exit(entry).await;

        match outcome {
            Ok(value) => Some(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// True while this guard holds `key`
    pub fn is_held(&self, key: &ResourceKey) -> bool {
        self.slots.contains_key(key)
    }

    /// How `key` is currently held by this guard, if at all
    pub fn mode(&self, key: &ResourceKey) -> Option<EntryMode> {
        self.slots.get(key).map(|slot| slot.mode)
    }

    pub fn has_distributed_lock(&self) -> bool {
        self.lock.is_some()
    }

    pub fn stats(&self) -> GuardStats {
        GuardStats {
            granted: self.granted.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
            fallback: self.fallback.load(Ordering::Relaxed),
            held: self.slots.len(),
        }
    }

    /// Claim the local slot for `key`, taking over one older than the
    /// lock TTL (its holder is assumed gone). Returns the new slot's
    /// generation.
    fn claim_slot(&self, key: &ResourceKey) -> Option<u64> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let fresh = Slot {
            generation,
            mode: EntryMode::LocalOnly,
            taken_at: Instant::now(),
        };

        match self.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().taken_at.elapsed() < self.config.lock_ttl {
                    return None;
                }
                warn!(resource = %key, "Taking over abandoned edit slot");
                occupied.insert(fresh);
                Some(generation)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Some(generation)
            }
        }
    }

    /// Record how the slot of `generation` is held. `None` if the slot
    /// was taken over while the distributed lock was being acquired.
    fn grant(
        &self,
        key: &ResourceKey,
        generation: u64,
        token: Option<LockToken>,
        mode: EntryMode,
    ) -> Option<EditEntry> {
        match self.slots.get_mut(key) {
            Some(mut slot) if slot.generation == generation => {
                slot.mode = mode;
            }
            _ => {
                self.busy.fetch_add(1, Ordering::Relaxed);
                debug!(resource = %key, "Edit slot taken over during entry");
                return None;
            }
        }

        self.granted.fetch_add(1, Ordering::Relaxed);
        Some(EditEntry {
            key: key.clone(),
            generation,
            token,
            mode,
        })
    }
}

impl std::fmt::Debug for ResourceEditGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceEditGuard")
            .field("config", &self.config)
            .field("lock", &self.lock)
            .field("held", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemorySharedStore;
    use futures::future::join_all;

    fn distributed(store: &Arc<InMemorySharedStore>) -> ResourceEditGuard {
        ResourceEditGuard::new(GuardConfig::default(), Some(store.clone() as Arc<dyn SharedStore>))
    }

    fn short_ttl(store: Option<&Arc<InMemorySharedStore>>) -> ResourceEditGuard {
        let config = GuardConfig {
            lock_ttl: Duration::from_millis(100),
            ..Default::default()
        };
        ResourceEditGuard::new(config, store.map(|s| s.clone() as Arc<dyn SharedStore>))
    }

    #[tokio::test]
    async fn test_enter_busy_exit() {
        let store = Arc::new(InMemorySharedStore::new());
        let guard = distributed(&store);
        let key = ResourceKey::new("chat:42");

        let entry = guard.try_enter(&key).await.unwrap();
        assert_eq!(entry.mode(), EntryMode::Distributed);
        assert_eq!(entry.resource(), &key);
        assert_eq!(guard.mode(&key), Some(EntryMode::Distributed));
        assert!(store.peek("lock:chat:42").is_some());

        assert!(guard.try_enter(&key).await.is_none());

        assert!(guard.exit(entry).await);
        assert!(store.peek("lock:chat:42").is_none());
        let _held = guard.try_enter(&key).await.unwrap();

        let stats = guard.stats();
        assert_eq!(stats.granted, 2);
        assert_eq!(stats.busy, 1);
        assert_eq!(stats.held, 1);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_single_winner() {
        let store = Arc::new(InMemorySharedStore::new());
        let guard = distributed(&store);
        let key = ResourceKey::message(42, 7);

        let results = join_all((0..10).map(|_| guard.try_enter(&key))).await;
        assert_eq!(results.iter().filter(|entry| entry.is_some()).count(), 1);
    }

    #[tokio::test]
    async fn test_excludes_across_guards_sharing_a_store() {
        let store = Arc::new(InMemorySharedStore::new());
        let first = distributed(&store);
        let second = distributed(&store);
        let key = ResourceKey::new("chat:42");

        let entry = first.try_enter(&key).await.unwrap();
        assert!(second.try_enter(&key).await.is_none());
        assert!(!second.is_held(&key));

        first.exit(entry).await;
        assert!(second.try_enter(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_store_outage_falls_back_to_local() {
        let store = Arc::new(InMemorySharedStore::new());
        let guard = distributed(&store);
        let key = ResourceKey::new("chat:42");
        store.set_offline(true);

        let entry = guard.try_enter(&key).await.unwrap();
        assert_eq!(entry.mode(), EntryMode::Fallback);
        assert!(guard.try_enter(&key).await.is_none());

        assert!(guard.exit(entry).await);
        assert_eq!(guard.stats().fallback, 1);
        assert_eq!(store.stats().lock_ops, 1);
    }

    #[tokio::test]
    async fn test_local_only_guard() {
        let guard = ResourceEditGuard::new(GuardConfig::default(), None);
        let key = ResourceKey::new("chat:42");

        let entry = guard.try_enter(&key).await.unwrap();
        assert_eq!(guard.mode(&key), Some(EntryMode::LocalOnly));
        assert!(guard.try_enter(&key).await.is_none());
        assert!(guard.exit(entry).await);
        assert!(!guard.is_held(&key));
    }

    #[tokio::test]
    async fn test_abandoned_slot_is_taken_over() {
        let guard = short_ttl(None);
        let key = ResourceKey::new("chat:42");

        let _abandoned = guard.try_enter(&key).await.unwrap();
        assert!(guard.try_enter(&key).await.is_none());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(guard.try_enter(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_stale_holder_exit_keeps_new_holder() {
        let store = Arc::new(InMemorySharedStore::new());
        let guard = short_ttl(Some(&store));
        let key = ResourceKey::new("chat:42");

        let slow = guard.try_enter(&key).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let current = guard.try_enter(&key).await.unwrap();
        assert_eq!(current.mode(), EntryMode::Distributed);
        let current_token = store.peek("lock:chat:42").unwrap();

        // The slow holder finishes after its slot was taken over.
        assert!(!guard.exit(slow).await);

        assert!(guard.is_held(&key));
        assert_eq!(guard.mode(&key), Some(EntryMode::Distributed));
        assert_eq!(store.peek("lock:chat:42"), Some(current_token));
        assert!(guard.try_enter(&key).await.is_none());

        assert!(guard.exit(current).await);
        assert!(!guard.is_held(&key));
        assert!(store.peek("lock:chat:42").is_none());
    }

    #[tokio::test]
    async fn test_stale_holder_exit_keeps_new_local_holder() {
        let guard = short_ttl(None);
        let key = ResourceKey::new("chat:42");

        let slow = guard.try_enter(&key).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        let current = guard.try_enter(&key).await.unwrap();

        assert!(!guard.exit(slow).await);
        assert!(guard.try_enter(&key).await.is_none());
        assert!(guard.exit(current).await);
        assert!(guard.try_enter(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_run_exclusive() {
        let store = Arc::new(InMemorySharedStore::new());
        let guard = distributed(&store);
        let key = ResourceKey::new("chat:42");

        assert_eq!(guard.run_exclusive(&key, async { 7 }).await, Some(7));
        assert!(!guard.is_held(&key));

        let _held = guard.try_enter(&key).await.unwrap();
        assert_eq!(guard.run_exclusive(&key, async { 7 }).await, None);
    }

    #[tokio::test]
    async fn test_run_exclusive_exits_on_panic() {
        let store = Arc::new(InMemorySharedStore::new());
        let guard = distributed(&store);
        let key = ResourceKey::new("chat:42");

        let result = AssertUnwindSafe(guard.run_exclusive(&key, async {
            panic!("render failed");
        }))
        .catch_unwind()
        .await;

        assert!(result.is_err());
        assert!(!guard.is_held(&key));
        assert!(store.peek("lock:chat:42").is_none());
    }
}
