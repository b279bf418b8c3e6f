//! Quote Cache
//!
//! Two-tier read-through cache in front of the quote provider.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       TieredCache                             │
//! │                                                               │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐   │
//! │  │  LocalTier   │   │  SharedTier  │   │  Fetch tickets   │   │
//! │  │  DashMap     │──►│  SharedStore │──►│  (coalescing)    │   │
//! │  │  30s / 500   │   │  60s, dex:   │   └────────┬─────────┘   │
//! │  └──────────────┘   └──────────────┘            │             │
//! │                                      ┌──────────▼─────────┐   │
//! │                                      │  ConcurrencyGate   │   │
//! │                                      │  FIFO, 6 permits   │   │
//! │                                      └──────────┬─────────┘   │
//! └─────────────────────────────────────────────────┼─────────────┘
//!        ▲                                          ▼
//! ┌──────┴────────────┐                    ┌─────────────────┐
//! │ PrefetchScheduler │                    │  QuoteProvider  │
//! └───────────────────┘                    └─────────────────┘
//! ```

mod entry;
mod gate;
mod local;
mod metrics;
mod prefetch;
mod shared;
mod tiered;

pub use entry::CacheEntry;
pub use gate::{ConcurrencyGate, GatePermit};
pub use local::LocalTier;
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use prefetch::{PrefetchConfig, PrefetchScheduler, SchedulerState};
pub use shared::SharedTier;
pub use tiered::{TieredCache, TieredCacheConfig};
