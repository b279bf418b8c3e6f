//! Core wiring
//!
//! `QuoteCore` owns one tiered cache, its prefetcher and an edit guard,
//! all built over the same provider and (optional) shared store. Nothing
//! here is global: independent cores can coexist in one process.

use std::sync::Arc;

use serde::Serialize;

use crate::cache::{
    MetricsSnapshot, PrefetchConfig, PrefetchScheduler, TieredCache, TieredCacheConfig,
};
use crate::domain::ports::{QuoteProvider, SharedStore};
use crate::lock::{GuardConfig, GuardStats, ResourceEditGuard};

/// Configuration for every core component
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    pub cache: TieredCacheConfig,
    pub prefetch: PrefetchConfig,
    pub guard: GuardConfig,
}

/// Point-in-time view of the core, for health and metrics output
#[derive(Debug, Clone, Serialize)]
pub struct CoreStatus {
    pub shared_store: Option<String>,
    pub cache: MetricsSnapshot,
    pub guard: GuardStats,
    pub local_entries: usize,
    pub in_flight: usize,
    pub gate_active: usize,
    pub gate_waiting: usize,
    pub prefetch_pending: usize,
}

/// The caching and coordination layer.
#[derive(Debug)]
pub struct QuoteCore {
    cache: TieredCache,
    prefetch: PrefetchScheduler,
    guard: ResourceEditGuard,
    store_name: Option<String>,
}

impl QuoteCore {
    /// Build a core. Without a shared store the cache runs local-only and
    /// the guard excludes within this process only.
    pub fn new(
        config: CoreConfig,
        provider: Arc<dyn QuoteProvider>,
        store: Option<Arc<dyn SharedStore>>,
    ) -> Self {
        let store_name = store.as_ref().map(|s| s.name().to_string());
        let cache = TieredCache::new(config.cache, provider, store.clone());
        let prefetch = PrefetchScheduler::new(cache.clone(), config.prefetch);
        let guard = ResourceEditGuard::new(config.guard, store);

        Self {
            cache,
            prefetch,
            guard,
            store_name,
        }
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn prefetch(&self) -> &PrefetchScheduler {
        &self.prefetch
    }

    pub fn guard(&self) -> &ResourceEditGuard {
        &self.guard
    }

    pub fn status(&self) -> CoreStatus {
        CoreStatus {
            shared_store: self.store_name.clone(),
            cache: self.cache.metrics().snapshot(),
            guard: self.guard.stats(),
            local_entries: self.cache.local().len(),
            in_flight: self.cache.in_flight(),
            gate_active: self.cache.gate().active(),
            gate_waiting: self.cache.gate().waiting(),
            prefetch_pending: self.prefetch.pending_len(),
        }
    }

    /// Stop background work
    pub fn shutdown(&self) {
        self.prefetch.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemorySharedStore, ScriptedProvider};
    use crate::domain::ports::ResourceKey;

    #[tokio::test]
    async fn test_cores_share_store_not_state() {
        let store: Arc<dyn SharedStore> = Arc::new(InMemorySharedStore::new());
        let provider = Arc::new(ScriptedProvider::new());

        let a = QuoteCore::new(CoreConfig::default(), provider.clone(), Some(store.clone()));
        let b = QuoteCore::new(CoreConfig::default(), provider.clone(), Some(store));

        a.cache().get("mint").await.unwrap();
        assert!(!b.cache().is_warm("mint"));

        // Second core finds the value in the shared tier.
        b.cache().get("mint").await.unwrap();
        assert_eq!(provider.total_calls(), 1);
        assert_eq!(b.status().cache.shared_hits, 1);

        let key = ResourceKey::message(42, 1);
        let entry = a.guard().try_enter(&key).await.unwrap();
        assert!(b.guard().try_enter(&key).await.is_none());
        a.guard().exit(entry).await;
    }

    #[tokio::test]
    async fn test_status_without_store() {
        let core = QuoteCore::new(CoreConfig::default(), Arc::new(ScriptedProvider::new()), None);
        core.cache().get("mint").await;

        let status = core.status();
        assert!(status.shared_store.is_none());
        assert_eq!(status.local_entries, 1);
        assert_eq!(status.cache.provider_fetches, 1);
        assert_eq!(status.gate_active, 0);

        core.shutdown();
        assert!(!core.prefetch().enqueue("other"));
    }
}
