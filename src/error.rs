//! Error types for quotegate

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the caching and coordination layer.
///
/// None of these are fatal to the process. The public cache and lock
/// operations collapse them into absent/negative results; the `try_*`
/// variants surface them for callers that need to tell "held" apart from
/// "store unreachable".
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Provider Errors
    // =========================================================================
    /// Provider connection or timeout error
    #[error("Provider connection error: {0}")]
    ProviderConnection(#[source] reqwest::Error),

    /// Provider answered with a non-success status
    #[error("Provider returned status {status} for {key}")]
    ProviderStatus { key: String, status: u16 },

    /// Provider answered with an empty body
    #[error("Provider returned an empty payload for {key}")]
    ProviderEmpty { key: String },

    // =========================================================================
    // Shared Store Errors
    // =========================================================================
    /// Shared store could not be reached
    #[error("Shared store unavailable: {0}")]
    StoreUnavailable(String),

    /// Redis command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool checkout error
    #[error("Redis pool error: {0}")]
    RedisPool(#[from] deadpool_redis::PoolError),

    // =========================================================================
    // Misc
    // =========================================================================
    /// Payload decode error
    #[error("Failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures of the outbound provider call.
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            Error::ProviderConnection(_) | Error::ProviderStatus { .. } | Error::ProviderEmpty { .. }
        )
    }

    /// True for failures talking to the shared cache/lock store.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_) | Error::Redis(_) | Error::RedisPool(_)
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
