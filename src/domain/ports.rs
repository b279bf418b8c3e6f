//! Domain Ports (Port/Adapter Pattern)
//!
//! The core depends on exactly two collaborators: the market-data provider
//! and the shared cache/lock store. Both are traits here; `crate::adapters`
//! holds the concrete implementations.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Core                                  │
//! │   TieredCache │ PrefetchScheduler │ ResourceEditGuard        │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                         │
//!                 ▼                         ▼
//!        ┌────────────────┐        ┌──────────────────┐
//!        │ QuoteProvider  │        │   SharedStore    │
//!        └────────────────┘        └──────────────────┘
//!          Dexscreener               Redis │ InMemory
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// Identity of one externally addressed, editable resource
/// (for example a rendered chat message).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey(pub String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for one message inside one chat.
    pub fn message(chat_id: i64, message_id: i64) -> Self {
        Self(format!("chat:{}:msg:{}", chat_id, message_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ResourceKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Random ownership token proving who holds a lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(pub String);

impl LockToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Provider Port
// =============================================================================

/// Port for the slow, rate-limited market-data provider.
///
/// One call, one request: implementations apply their own timeout and must
/// not retry. Any `Ok` payload is treated as valid and cached as-is.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Fetch the raw payload for one item.
    async fn fetch(&self, key: &str) -> Result<Bytes>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

// =============================================================================
// Shared Store Port
// =============================================================================

/// Port for the cross-process key/value store backing the shared cache tier
/// and the distributed lock.
///
/// These four operations are the whole surface the core needs. The two
/// lock primitives must each be a single atomic operation on the store.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read a value; `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write a value with a time-to-live (milliseconds on the wire, minimum 1).
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Create `key = token` only if `key` is absent. Returns whether it was set.
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if its current value equals `token`. Returns whether
    /// it was deleted.
    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool>;

    /// Short name used in logs and health output.
    fn name(&self) -> &str;
}

// =============================================================================
// Tests
// =============================================================================
