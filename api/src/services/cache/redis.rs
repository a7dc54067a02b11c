//! Redis-backed verdict store
//!
//! Verdicts are stored as JSON under `moderation:verdict:<key>` with a native
//! `SET EX` expiry. Every round trip is bounded by `op_timeout`.
//!
//! The connection is opened on first use, so a Redis that is down at startup
//! is picked up once it comes back. Failed attempts are spaced by
//! `RECONNECT_BACKOFF` and requests in between skip the cache.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{CacheError, CacheResult, CacheStats, CacheStore};
use crate::domain::moderation::{CacheKey, Verdict};

const KEY_PREFIX: &str = "moderation:verdict:";
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Link {
    manager: Option<ConnectionManager>,
    last_attempt: Option<Instant>,
}

pub struct RedisCacheStore {
    client: redis::Client,
    op_timeout: Duration,
    link: Mutex<Link>,
}

fn redis_key(key: &CacheKey) -> String {
    format!("{}{}", KEY_PREFIX, key)
}

/// Pull `field:value` out of an `INFO` reply
fn info_field<'a>(info: &'a str, field: &str) -> Option<&'a str> {
    info.lines().find_map(|line| {
        line.strip_prefix(field)
            .and_then(|rest| rest.strip_prefix(':'))
            .map(str::trim)
    })
}

impl RedisCacheStore {
    /// Fails only on a malformed URL; no connection is made yet
    pub fn new(url: &str, op_timeout: Duration) -> CacheResult<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            op_timeout,
            link: Mutex::new(Link::default()),
        })
    }

    /// Shared connection, opened on demand. Once established the manager
    /// reconnects on its own.
    pub async fn connection(&self) -> CacheResult<ConnectionManager> {
        let mut link = self.link.lock().await;
        if let Some(manager) = &link.manager {
            return Ok(manager.clone());
        }

        if let Some(at) = link.last_attempt {
            if at.elapsed() < RECONNECT_BACKOFF {
                return Err(CacheError::Unavailable("waiting to reconnect".to_string()));
            }
        }
        link.last_attempt = Some(Instant::now());

        let connecting = ConnectionManager::new(self.client.clone());
        let manager = tokio::time::timeout(self.op_timeout, connecting)
            .await
            .map_err(|_| CacheError::Timeout(self.op_timeout))?
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        tracing::info!("[cache] Redis connected");
        link.manager = Some(manager.clone());
        Ok(manager)
    }

    async fn bounded<T, F>(&self, fut: F) -> CacheResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout(self.op_timeout))?
            .map_err(CacheError::from)
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Verdict>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = self.bounded(conn.get(redis_key(key))).await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, verdict: &Verdict, ttl: Duration) -> CacheResult<()> {
        let payload = serde_json::to_string(verdict)?;
        let seconds = ttl.as_secs().max(1);
        let mut conn = self.connection().await?;
        self.bounded(conn.set_ex::<_, _, ()>(redis_key(key), payload, seconds))
            .await
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = self.bounded(conn.del(redis_key(key))).await?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> bool {
        let pong: CacheResult<String> = match self.connection().await {
            Ok(mut conn) => self.bounded(redis::cmd("PING").query_async(&mut conn)).await,
            Err(e) => Err(e),
        };
        match pong {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "[cache] Redis ping failed");
                false
            }
        }
    }

    async fn stats(&self) -> CacheStats {
        let info: CacheResult<String> = match self.connection().await {
            Ok(mut conn) => self.bounded(redis::cmd("INFO").query_async(&mut conn)).await,
            Err(e) => Err(e),
        };

        match info {
            Ok(info) => CacheStats {
                backend: self.backend(),
                connected: true,
                entries: None,
                used_memory: info_field(&info, "used_memory_human").map(str::to_string),
                connected_clients: info_field(&info, "connected_clients")
                    .and_then(|v| v.parse().ok()),
            },
            Err(e) => {
                tracing::warn!(error = %e, "[cache] Redis INFO failed");
                CacheStats::disconnected(self.backend())
            }
        }
    }
}
