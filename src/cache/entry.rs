//! Cache Entry Types

use std::time::{Duration, Instant};

use bytes::Bytes;

/// One cached payload with an absolute expiry.
///
/// Entries are immutable: a refresh builds a new entry and replaces the old
/// one wholesale.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    key: String,
    value: Bytes,
    expires_at: Instant,
}

impl CacheEntry {
    /// Create an entry that expires `ttl` from now
    pub fn new(key: impl Into<String>, value: Bytes, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Payload (cheap clone)
    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    #[inline]
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Time left before expiry (zero once expired)
    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}
