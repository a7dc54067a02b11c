use async_trait::async_trait;
use std::time::Duration;

use super::{CacheResult, CacheStats, CacheStore};
use crate::domain::moderation::{CacheKey, Verdict};

/// Always-miss store - bypass-cache mode
pub struct NoOpCacheStore;

#[async_trait]
impl CacheStore for NoOpCacheStore {
    fn backend(&self) -> &'static str {
        "none"
    }

    async fn get(&self, _key: &CacheKey) -> CacheResult<Option<Verdict>> {
        Ok(None)
    }

    async fn put(&self, _key: &CacheKey, _verdict: &Verdict, _ttl: Duration) -> CacheResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &CacheKey) -> CacheResult<bool> {
        Ok(false)
    }

    async fn ping(&self) -> bool {
        false
    }

    async fn stats(&self) -> CacheStats {
        CacheStats::disconnected(self.backend())
    }
}
