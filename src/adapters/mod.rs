//! Infrastructure Adapters
//!
//! Implementations of the domain ports, following the Port/Adapter
//! (Hexagonal) pattern.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Ports (crate::domain)                        │
//! │            QuoteProvider          │         SharedStore          │
//! └─────────────────────────────────────────────────────────────────┘
//!                  │                                │
//!                  ▼                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  DexscreenerProvider │ ScriptedProvider                          │
//! │  RedisSharedStore    │ InMemorySharedStore                       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod dexscreener;
mod fixture;
mod memory_store;
mod redis_store;

pub use dexscreener::{DexscreenerProvider, ProviderConfig, TokenQuote};
pub use fixture::ScriptedProvider;
pub use memory_store::{InMemorySharedStore, InMemoryStoreStats};
pub use redis_store::{create_shared_store, RedisConfig, RedisSharedStore};
