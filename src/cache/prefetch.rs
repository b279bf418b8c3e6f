//! Prefetch Scheduler
//!
//! Best-effort background warming. Keys are queued without blocking and
//! drained in fixed-size batches through `TieredCache::get`, so prefetches
//! share the same coalescing and gate as foreground lookups.
//!
//! ```text
//!            enqueue (first since idle)
//!   ┌──────┐ ─────────────────────────► ┌──────────┐ ─┐ batch done,
//!   │ Idle │                            │ Draining │  │ queue non-empty
//!   └──────┘ ◄───────────────────────── └──────────┘ ◄┘
//!             batch done, queue empty
//!             or shutdown
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

use super::tiered::TieredCache;

/// Prefetch configuration
#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// Keys drained per batch
    pub batch_size: usize,

    /// Delay before each drain
    pub drain_delay: Duration,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            drain_delay: Duration::from_millis(100),
        }
    }
}

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No drain task exists
    Idle,
    /// Exactly one drain task exists
    Draining,
}

#[derive(Debug)]
struct Queue {
    order: VecDeque<String>,
    pending: HashSet<String>,
    state: SchedulerState,
}

struct Inner {
    cache: TieredCache,
    config: PrefetchConfig,
    queue: Mutex<Queue>,
    cancel: CancellationToken,
}

/// Background prefetcher bound to one cache.
///
/// Dropping the scheduler stops its drain task.
pub struct PrefetchScheduler {
    inner: Arc<Inner>,
    _drop_guard: DropGuard,
}

impl PrefetchScheduler {
    pub fn new(cache: TieredCache, config: PrefetchConfig) -> Self {
        let cancel = CancellationToken::new();
        Self {
            _drop_guard: cancel.clone().drop_guard(),
            inner: Arc::new(Inner {
                cache,
                config,
                queue: Mutex::new(Queue {
                    order: VecDeque::new(),
                    pending: HashSet::new(),
                    state: SchedulerState::Idle,
                }),
                cancel,
            }),
        }
    }

    /// Queue `key` for background refresh.
    ///
    /// No-op (returns `false`) when the key is already warm locally, already
    /// being fetched, already queued, or the scheduler is shut down. Arms a
    /// drain task when leaving `Idle`, so it must run inside a Tokio runtime.
    pub fn enqueue(&self, key: &str) -> bool {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return false;
        }

        let metrics = inner.cache.metrics();
        if inner.cache.is_warm(key) || inner.cache.is_fetching(key) {
            metrics.record_prefetch_skipped();
            return false;
        }

        let arm = {
            let mut queue = inner.queue.lock();
            if !queue.pending.insert(key.to_string()) {
                return false;
            }
            queue.order.push_back(key.to_string());

            match queue.state {
                SchedulerState::Idle => {
                    queue.state = SchedulerState::Draining;
                    true
                }
                SchedulerState::Draining => false,
            }
        };

        metrics.record_prefetch_enqueued();
        if arm {
            tokio::spawn(Self::drain(inner.clone()));
        }
        true
    }

    /// Enqueue every key; returns how many were actually added.
    pub fn enqueue_all<I, K>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        keys.into_iter()
            .filter(|key| self.enqueue(key.as_ref()))
            .count()
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.queue.lock().state
    }

    /// Keys waiting for a drain
    pub fn pending_len(&self) -> usize {
        self.inner.queue.lock().order.len()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.inner.queue.lock().pending.contains(key)
    }

    /// Stop draining and drop queued keys. Later `enqueue` calls are ignored.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut queue = self.inner.queue.lock();
        let dropped = queue.order.len();
        queue.order.clear();
        queue.pending.clear();
        if dropped > 0 {
            info!(dropped, "Prefetch scheduler shut down with queued keys");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    async fn drain(inner: Arc<Inner>) {
        loop {
            tokio::select! {
                _ = inner.cancel.cancelled() => {
                    inner.queue.lock().state = SchedulerState::Idle;
                    return;
                }
                _ = tokio::time::sleep(inner.config.drain_delay) => {}
            }

            let batch: Vec<String> = {
                let mut queue = inner.queue.lock();
                let take = inner.config.batch_size.max(1).min(queue.order.len());
                let batch: Vec<String> = queue.order.drain(..take).collect();
                for key in &batch {
                    queue.pending.remove(key);
                }
                batch
            };

            if !batch.is_empty() {
                inner.cache.metrics().record_prefetch_batch();
                let results = join_all(batch.iter().map(|key| inner.cache.get(key))).await;
                let warmed = results.iter().filter(|r| r.is_some()).count();
                debug!(batch = batch.len(), warmed, "Prefetch batch drained");
            }

            let mut queue = inner.queue.lock();
            if queue.order.is_empty() || inner.cancel.is_cancelled() {
                queue.state = SchedulerState::Idle;
                return;
            }
        }
    }
}

impl std::fmt::Debug for PrefetchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchScheduler")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .field("pending", &self.pending_len())
            .finish()
    }
}
