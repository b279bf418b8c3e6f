//! Tiered Cache
//!
//! Read-through lookup over a local tier, an optional shared tier and the
//! quote provider. Concurrent misses for one key are coalesced onto a
//! single fetch ticket, and every outbound call passes the concurrency
//! gate.
//!
//! ```text
//!   get(key)
//!      │
//!      ├─► LocalTier ──── hit ───────────────────────────────► value
//!      │
//!      ├─► SharedTier ─── hit ──► populate local ────────────► value
//!      │
//!      └─► tickets[key] ─ exists ──► await shared result ────► value | none
//!                       └ absent ──► spawn: gate → provider
//!                                        → populate both tiers
//!                                        → drop ticket ──────► value | none
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::domain::ports::{QuoteProvider, SharedStore};

use super::gate::ConcurrencyGate;
use super::local::LocalTier;
use super::metrics::CacheMetrics;
use super::shared::SharedTier;

// =============================================================================
// Configuration
// =============================================================================

/// Tiered cache configuration
#[derive(Debug, Clone)]
pub struct TieredCacheConfig {
    /// Local tier TTL (burst absorption only)
    pub local_ttl: Duration,

    /// Local tier entry bound
    pub local_max_entries: usize,

    /// Shared tier TTL (the freshness contract)
    pub shared_ttl: Duration,

    /// Prefix for shared tier keys
    pub shared_namespace: String,

    /// Simultaneous provider calls allowed
    pub max_concurrent_fetches: usize,

    /// Keys resolved concurrently per chunk in `get_many`
    pub batch_size: usize,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            local_ttl: Duration::from_secs(30),
            local_max_entries: 500,
            shared_ttl: Duration::from_secs(60),
            shared_namespace: "dex".to_string(),
            max_concurrent_fetches: 6,
            batch_size: 10,
        }
    }
}

// =============================================================================
// Tiered Cache
// =============================================================================

/// Pending result of one outbound fetch, shared by every coalesced caller.
type FetchTicket = Shared<BoxFuture<'static, Option<Bytes>>>;

struct Inner {
    config: TieredCacheConfig,
    local: LocalTier,
    shared: Option<SharedTier>,
    provider: Arc<dyn QuoteProvider>,
    gate: ConcurrencyGate,
    tickets: Mutex<HashMap<String, FetchTicket>>,
    metrics: Arc<CacheMetrics>,
}

/// Coalescing two-tier read-through cache. Cheap to clone.
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<Inner>,
}

impl TieredCache {
    /// Create a cache. Without a shared store it runs local-only.
    pub fn new(
        config: TieredCacheConfig,
        provider: Arc<dyn QuoteProvider>,
        store: Option<Arc<dyn SharedStore>>,
    ) -> Self {
        let shared = store.map(|store| {
            SharedTier::new(store, config.shared_ttl, config.shared_namespace.clone())
        });

        Self {
            inner: Arc::new(Inner {
                local: LocalTier::new(config.local_ttl, config.local_max_entries),
                shared,
                provider,
                gate: ConcurrencyGate::new(config.max_concurrent_fetches),
                tickets: Mutex::new(HashMap::new()),
                metrics: Arc::new(CacheMetrics::new()),
                config,
            }),
        }
    }

    /// Look up `key`, fetching it on a miss.
    ///
    /// `None` means the provider failed (or the fetch task died). Failures
    /// are never cached, so the next call retries.
    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let inner = &self.inner;

        if let Some(value) = inner.local.get(key) {
            inner.metrics.record_local_hit();
            debug!("Local tier hit");
            return Some(value);
        }

        if let Some(shared) = &inner.shared {
            if let Some(value) = shared.get(key, &inner.metrics).await {
                inner.metrics.record_shared_hit();
                inner.local.insert(key, value.clone());
                debug!("Shared tier hit");
                return Some(value);
            }
        }

        let ticket = {
            let mut tickets = inner.tickets.lock();

            // A fetch may have completed since the local check above.
            if let Some(value) = inner.local.get(key) {
                inner.metrics.record_local_hit();
                return Some(value);
            }

            inner.metrics.record_miss();
            match tickets.get(key) {
                Some(ticket) => {
                    inner.metrics.record_coalesced_wait();
                    debug!("Joining in-flight fetch");
                    ticket.clone()
                }
                None => {
                    let ticket = Self::start_fetch(inner.clone(), key.to_string());
                    tickets.insert(key.to_string(), ticket.clone());
                    ticket
                }
            }
        };

        ticket.await
    }

    /// Resolve many keys. Duplicates are collapsed; keys are resolved
    /// `batch_size` at a time through `get`. Only found keys are returned.
    pub async fn get_many<I, K>(&self, keys: I) -> HashMap<String, Bytes>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let unique: Vec<String> = keys
            .into_iter()
            .map(|k| k.as_ref().to_string())
            .filter(|k| seen.insert(k.clone()))
            .collect();

        let mut found = HashMap::with_capacity(unique.len());
        for chunk in unique.chunks(self.inner.config.batch_size.max(1)) {
            let results = join_all(chunk.iter().map(|key| async move {
                (key, self.get(key).await)
            }))
            .await;

            for (key, value) in results {
                if let Some(value) = value {
                    found.insert(key.clone(), value);
                }
            }
        }
        found
    }

    /// True while an outbound fetch for `key` is in flight
    pub fn is_fetching(&self, key: &str) -> bool {
        self.inner.tickets.lock().contains_key(key)
    }

    /// True when the local tier holds an unexpired value for `key`
    pub fn is_warm(&self, key: &str) -> bool {
        self.inner.local.is_fresh(key)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.tickets.lock().len()
    }

    pub fn has_shared_tier(&self) -> bool {
        self.inner.shared.is_some()
    }

    pub fn metrics(&self) -> Arc<CacheMetrics> {
        self.inner.metrics.clone()
    }

    pub fn local(&self) -> &LocalTier {
        &self.inner.local
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.inner.gate
    }

    pub fn config(&self) -> &TieredCacheConfig {
        &self.inner.config
    }

    /// Spawn the fetch for a new ticket. The task owns the ticket's
    /// removal, so it completes even if every caller stops waiting.
    fn start_fetch(inner: Arc<Inner>, key: String) -> FetchTicket {
        let handle = tokio::spawn(async move {
            let _ticket = TicketRelease {
                inner: inner.clone(),
                key: key.clone(),
            };
            Self::fetch_and_populate(&inner, &key).await
        });

        handle
            .map(|joined| match joined {
                Ok(value) => value,
                Err(e) => {
                    warn!(error = %e, "Fetch task failed");
                    None
                }
            })
            .boxed()
            .shared()
    }

    async fn fetch_and_populate(inner: &Inner, key: &str) -> Option<Bytes> {
        let permit = match inner.gate.admit().await {
            Ok(permit) => permit,
            Err(e) => {
                warn!(key, error = %e, "Gate admission failed");
                return None;
            }
        };

        let started = Instant::now();
        let result = inner.provider.fetch(key).await;
        drop(permit);

        match result {
            Ok(value) => {
                inner.metrics.record_provider_fetch(started.elapsed());
                inner.local.insert(key, value.clone());
                if let Some(shared) = &inner.shared {
                    shared.set(key, value.clone(), &inner.metrics).await;
                }
                debug!(key, provider = inner.provider.name(), "Fetched and cached");
                Some(value)
            }
            Err(e) => {
                inner.metrics.record_provider_failure();
                warn!(key, provider = inner.provider.name(), error = %e, "Provider fetch failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("config", &self.inner.config)
            .field("local_entries", &self.inner.local.len())
            .field("shared", &self.inner.shared)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Removes a fetch ticket when its task ends, on every path.
struct TicketRelease {
    inner: Arc<Inner>,
    key: String,
}

impl Drop for TicketRelease {
    fn drop(&mut self) {
        self.inner.tickets.lock().remove(&self.key);
    }
}

// =============================================================================
// Tests
// =============================================================================
