//! In-process verdict store with per-entry deadlines
//!
//! A `Mutex` over a map plus an insertion-order queue, with short critical
//! sections and no awaits while the lock is held. Eviction pops the queue
//! front, so a put at capacity costs O(1) amortized.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{CacheError, CacheResult, CacheStats, CacheStore};
use crate::domain::moderation::{CacheKey, Verdict};

struct CacheEntry {
    verdict: Verdict,
    /// Matches the entry's slot in `Entries::order`
    seq: u64,
    deadline: Instant,
}

#[derive(Default)]
struct Entries {
    map: HashMap<CacheKey, CacheEntry>,
    /// Oldest first. A slot is stale once its key was overwritten or removed.
    order: VecDeque<(CacheKey, u64)>,
    next_seq: u64,
}

impl Entries {
    fn is_live(&self, key: &CacheKey, seq: u64) -> bool {
        self.map.get(key).is_some_and(|entry| entry.seq == seq)
    }

    fn insert(&mut self, key: &CacheKey, verdict: Verdict, deadline: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push_back((key.clone(), seq));
        self.map.insert(
            key.clone(),
            CacheEntry {
                verdict,
                seq,
                deadline,
            },
        );
        self.compact();
    }

    /// Evict the oldest entries until there is room for one more
    fn make_room(&mut self, max_entries: usize) {
        while self.map.len() >= max_entries {
            let Some((key, seq)) = self.order.pop_front() else {
                break;
            };
            if self.is_live(&key, seq) {
                self.map.remove(&key);
            }
        }
    }

    /// Drop stale slots once they outnumber the live ones
    fn compact(&mut self) {
        if self.order.len() > self.map.len() * 2 + 16 {
            let map = &self.map;
            self.order
                .retain(|(key, seq)| map.get(key).is_some_and(|entry| entry.seq == *seq));
        }
    }
}

pub struct MemoryCacheStore {
    max_entries: usize,
    entries: Mutex<Entries>,
}

impl MemoryCacheStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: Mutex::new(Entries::default()),
        }
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, Entries>> {
        self.entries
            .lock()
            .map_err(|e| CacheError::Unavailable(format!("memory cache poisoned: {}", e)))
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Verdict>> {
        let mut entries = self.lock()?;
        let now = Instant::now();

        match entries.map.get(key) {
            Some(entry) if entry.deadline > now => Ok(Some(entry.verdict.clone())),
            Some(_) => {
                entries.map.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, verdict: &Verdict, ttl: Duration) -> CacheResult<()> {
        let mut entries = self.lock()?;

        if !entries.map.contains_key(key) {
            entries.make_room(self.max_entries);
        }
        entries.insert(key, verdict.clone(), Instant::now() + ttl);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.lock()?.map.remove(key).is_some())
    }

    async fn ping(&self) -> bool {
        self.entries.lock().is_ok()
    }

    /// Expired entries count until they are read or evicted
    async fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().ok().map(|entries| entries.map.len());
        CacheStats {
            backend: self.backend(),
            connected: entries.is_some(),
            entries,
            used_memory: None,
            connected_clients: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::moderation::{Operation, OperationResult, OperationSet, Sensitivity};
    use chrono::Utc;

    fn key(image: &[u8]) -> CacheKey {
        CacheKey::derive(image, &OperationSet::default(), Sensitivity::Normal)
    }

    fn verdict() -> Verdict {
        Verdict::merge(
            [(
                Operation::Nudity,
                OperationResult {
                    score: 0.1,
                    flagged: false,
                    summary: "safe".into(),
                    details: vec![],
                },
            )],
            Sensitivity::Normal,
            Utc::now(),
            chrono::Duration::seconds(60),
        )
    }

    #[tokio::test]
    async fn test_put_then_get_returns_copy() {
        let store = MemoryCacheStore::new(10);
        let v = verdict();
        store.put(&key(b"a"), &v, Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get(&key(b"a")).await.unwrap(), Some(v));
        assert_eq!(store.get(&key(b"b")).await.unwrap(), None);
        assert_eq!(store.stats().await.entries, Some(1));
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_miss() {
        let store = MemoryCacheStore::new(10);
        store
            .put(&key(b"a"), &verdict(), Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.get(&key(b"a")).await.unwrap(), None);
        assert_eq!(store.stats().await.entries, Some(0));
    }

    #[tokio::test]
    async fn test_oldest_entry_evicted_at_capacity() {
        let store = MemoryCacheStore::new(2);
        let ttl = Duration::from_secs(60);
        store.put(&key(b"a"), &verdict(), ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        store.put(&key(b"b"), &verdict(), ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        store.put(&key(b"c"), &verdict(), ttl).await.unwrap();

        assert!(store.get(&key(b"a")).await.unwrap().is_none());
        assert!(store.get(&key(b"b")).await.unwrap().is_some());
        assert!(store.get(&key(b"c")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_overwrite_moves_entry_to_the_back() {
        let store = MemoryCacheStore::new(2);
        let ttl = Duration::from_secs(60);
        store.put(&key(b"a"), &verdict(), ttl).await.unwrap();
        store.put(&key(b"b"), &verdict(), ttl).await.unwrap();
        store.put(&key(b"a"), &verdict(), ttl).await.unwrap();
        store.put(&key(b"c"), &verdict(), ttl).await.unwrap();

        assert!(store.get(&key(b"a")).await.unwrap().is_some());
        assert!(store.get(&key(b"b")).await.unwrap().is_none());
        assert!(store.get(&key(b"c")).await.unwrap().is_some());
        assert_eq!(store.stats().await.entries, Some(2));
    }

    #[tokio::test]
    async fn test_order_queue_stays_bounded_under_overwrites() {
        let store = MemoryCacheStore::new(4);
        let ttl = Duration::from_secs(60);
        for _ in 0..1_000 {
            store.put(&key(b"a"), &verdict(), ttl).await.unwrap();
        }
        store.delete(&key(b"a")).await.unwrap();
        for image in [b"b", b"c", b"d", b"e", b"f"] {
            store.put(&key(image), &verdict(), ttl).await.unwrap();
        }

        let entries = store.lock().unwrap();
        assert_eq!(entries.map.len(), 4);
        assert!(entries.order.len() <= entries.map.len() * 2 + 17);
        assert!(!entries.map.contains_key(&key(b"b")));
    }

    #[tokio::test]
    async fn test_delete_reports_removal() {
        let store = MemoryCacheStore::new(10);
        store
            .put(&key(b"a"), &verdict(), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.delete(&key(b"a")).await.unwrap());
        assert!(!store.delete(&key(b"a")).await.unwrap());
        assert!(store.ping().await);
    }
}
