//! Redis Shared Store Adapter
//!
//! Implements the `SharedStore` port on a `deadpool-redis` pool.
//!
//! | Port operation       | Redis                                  |
//! |----------------------|----------------------------------------|
//! | `get`                | `GET key`                              |
//! | `set`                | `PSETEX key ttl_ms value`              |
//! | `set_if_absent`      | `SET key token NX PX ttl_ms`           |
//! | `compare_and_delete` | Lua: `GET` + `DEL` in one `EVALSHA`    |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_redis::{Pool, Runtime};
use once_cell::sync::Lazy;
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::domain::ports::SharedStore;
use crate::error::{Error, Result};

/// Deletes KEYS[1] only when it still holds ARGV[1].
static COMPARE_AND_DELETE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('get', KEYS[1]) == ARGV[1] then
            return redis.call('del', KEYS[1])
        else
            return 0
        end
        "#,
    )
});

// =============================================================================
// Configuration
// =============================================================================

/// Redis connection settings. Without Redis the core runs local-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable the shared store
    #[serde(default)]
    pub enabled: bool,

    /// Connection URL (e.g. "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// Redis-backed `SharedStore`
#[derive(Clone)]
pub struct RedisSharedStore {
    pool: Pool,
}

impl RedisSharedStore {
    /// Wrap an existing pool
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool from configuration without connecting.
    pub fn from_config(config: &RedisConfig) -> Result<Self> {
        let timeout = Some(Duration::from_millis(config.timeout_ms));
        let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size.max(1));
        pool_config.timeouts.wait = timeout;
        pool_config.timeouts.create = timeout;
        pool_config.timeouts.recycle = timeout;

        // `from_url` leaves the pool section unset.
        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::Config(format!("Failed to create Redis pool: {}", e)))?;

        Ok(Self::new(pool))
    }

    /// Check that a connection can be checked out and answers PING.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl SharedStore for RedisSharedStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.pool.get().await?;
        let data: Option<Vec<u8>> = conn.get(key).await?;
        Ok(data.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.pset_ex::<_, _, ()>(key, value.as_ref(), ttl_millis(ttl))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, token), fields(store = "redis"))]
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    #[instrument(skip(self, token), fields(store = "redis"))]
    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let deleted: i64 = COMPARE_AND_DELETE
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    fn name(&self) -> &str {
        "redis"
    }
}

/// Connect to Redis if enabled.
///
/// Returns `None` when Redis is disabled, the pool cannot be built, or the
/// first PING fails; the caller then runs with the local tier only.
pub async fn create_shared_store(config: &RedisConfig) -> Option<Arc<dyn SharedStore>> {
    if !config.enabled {
        info!("Redis disabled, using local cache only");
        return None;
    }

    info!(url = %config.url, "Connecting to Redis");

    let store = match RedisSharedStore::from_config(config) {
        Ok(store) => store,
        Err(e) => {
            warn!(error = %e, "Failed to create Redis pool. Falling back to local cache.");
            return None;
        }
    };

    match store.ping().await {
        Ok(()) => {
            info!("Connected to Redis");
            Some(Arc::new(store))
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to Redis. Falling back to local cache.");
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
