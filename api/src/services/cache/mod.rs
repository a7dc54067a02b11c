//! Verdict cache store
//!
//! The coordinator only sees `CacheStore`. Three backends:
//! - `RedisCacheStore`: shared store, native `SET EX` expiry
//! - `MemoryCacheStore`: in-process map with per-entry deadlines
//! - `NoOpCacheStore`: always-miss fallback when the Redis URL is malformed
//!
//! Cache errors are returned to the caller of the store but never make it
//! past the coordinator: reads degrade to a miss, writes are logged.

mod memory;
mod noop;
mod redis;

pub use self::memory::MemoryCacheStore;
pub use self::noop::NoOpCacheStore;
pub use self::redis::RedisCacheStore;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::domain::moderation::{CacheKey, Verdict};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cached value could not be decoded: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Backend report for `/cache/stats` and the startup log
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub backend: &'static str,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_clients: Option<u64>,
}

impl CacheStats {
    pub fn disconnected(backend: &'static str) -> Self {
        Self {
            backend,
            connected: false,
            entries: None,
            used_memory: None,
            connected_clients: None,
        }
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Stored verdict, or `None` when absent or expired
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Verdict>>;

    async fn put(&self, key: &CacheKey, verdict: &Verdict, ttl: Duration) -> CacheResult<()>;

    /// Returns whether a value was removed
    async fn delete(&self, key: &CacheKey) -> CacheResult<bool>;

    async fn ping(&self) -> bool;

    async fn stats(&self) -> CacheStats;
}

/// Pick a backend from configuration.
///
/// No Redis address → in-process memory store. Redis configured but not
/// reachable → the Redis store is kept and reconnects on later requests,
/// which skip the cache until then.
pub async fn connect(config: &Config) -> Arc<dyn CacheStore> {
    let Some(url) = config.redis_url.as_deref() else {
        tracing::info!(
            max_entries = config.memory_cache_max_entries,
            "[cache] No Redis configured, using in-process cache"
        );
        return Arc::new(MemoryCacheStore::new(config.memory_cache_max_entries));
    };

    let store = match RedisCacheStore::new(url, config.cache_op_timeout) {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!(error = %e, "[cache] Invalid Redis URL, caching disabled");
            return Arc::new(NoOpCacheStore);
        }
    };

    if let Err(e) = store.connection().await {
        tracing::warn!(error = %e, "[cache] Redis unreachable, will retry on demand");
    }
    Arc::new(store)
}
