//! quotegate - Tiered Quote Cache and Edit Locks
//!
//! Caching and coordination layer in front of a slow, rate-limited
//! market-data provider and in front of shared, editable chat messages.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            QuoteCore                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌───────────────────┐  ┌──────────────┐  ┌──────────────────┐  │
//! │  │ PrefetchScheduler │─▶│ TieredCache  │  │ ResourceEditGuard│  │
//! │  └───────────────────┘  │ local/shared │  │ local slots +    │  │
//! │                         │ + coalescing │  │ DistributedLock  │  │
//! │                         │ + gate       │  └────────┬─────────┘  │
//! │                         └──────┬───────┘           │            │
//! └────────────────────────────────┼───────────────────┼────────────┘
//!                                  ▼                   ▼
//!                           QuoteProvider         SharedStore
//! ```
//!
//! Nothing in this crate is fatal to the calling process: provider and
//! store failures surface as absent values or denied entries.
//!
//! # Modules
//!
//! - [`adapters`] - Provider and shared store implementations
//! - [`cache`] - Tiered cache, concurrency gate and prefetcher
//! - [`domain`] - Ports and value objects
//! - [`error`] - Error types
//! - [`lock`] - Distributed lock and resource edit guard
//! - [`service`] - Component wiring

pub mod adapters;
pub mod cache;
pub mod domain;
pub mod error;
pub mod lock;
pub mod service;

// Re-export commonly used types
pub use cache::{ConcurrencyGate, PrefetchScheduler, TieredCache, TieredCacheConfig};
pub use domain::{LockToken, QuoteProvider, ResourceKey, SharedStore};
pub use error::{Error, Result};
pub use lock::{DistributedLock, ResourceEditGuard};
pub use service::{CoreConfig, QuoteCore};
