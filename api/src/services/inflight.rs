//! In-flight computation registry
//!
//! Maps a cache key to the shared outcome of the one computation running for
//! it. The first caller for a key starts the computation, later callers clone
//! the `Shared` future and await the same result. The registration is dropped
//! by the computation itself once its outcome is final, so a caller that gives
//! up waiting never tears anything down.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::moderation::{CacheKey, Verdict};
use crate::error::ModerationError;

pub type Outcome = Result<Verdict, ModerationError>;

pub type SharedOutcome = Shared<BoxFuture<'static, Outcome>>;

#[derive(Default)]
pub struct InFlightRegistry {
    pending: Mutex<HashMap<CacheKey, SharedOutcome>>,
}

/// Whether `join_or_start` started a new computation or joined a running one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, SharedOutcome>> {
        // Entries are inserted and removed whole, poisoning leaves nothing half-done
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Join the computation running for `key`, or start one with `start`.
    ///
    /// Lookup and insert happen under one lock, so concurrent callers for
    /// the same key always end up on a single computation. `start` runs with
    /// the lock held and must not block.
    pub fn join_or_start<F>(&self, key: &CacheKey, start: F) -> (SharedOutcome, Role)
    where
        F: FnOnce() -> BoxFuture<'static, Outcome>,
    {
        let mut pending = self.lock();
        if let Some(running) = pending.get(key) {
            return (running.clone(), Role::Follower);
        }

        let outcome = start().shared();
        pending.insert(key.clone(), outcome.clone());
        (outcome, Role::Leader)
    }

    /// Drop the registration for `key`
    pub fn complete(&self, key: &CacheKey) {
        self.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Removes a registration when dropped, including on panic unwind
pub struct InFlightGuard {
    registry: Arc<InFlightRegistry>,
    key: CacheKey,
}

impl InFlightGuard {
    pub fn new(registry: Arc<InFlightRegistry>, key: CacheKey) -> Self {
        Self { registry, key }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.complete(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::moderation::{OperationSet, Sensitivity};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(image: &[u8]) -> CacheKey {
        CacheKey::derive(image, &OperationSet::default(), Sensitivity::Normal)
    }

    fn never() -> BoxFuture<'static, Outcome> {
        futures::future::pending().boxed()
    }

    #[test]
    fn test_second_caller_joins_first() {
        let registry = InFlightRegistry::new();
        let starts = AtomicUsize::new(0);

        let (_, first) = registry.join_or_start(&key(b"a"), || {
            starts.fetch_add(1, Ordering::SeqCst);
            never()
        });
        let (_, second) = registry.join_or_start(&key(b"a"), || {
            starts.fetch_add(1, Ordering::SeqCst);
            never()
        });

        assert_eq!(first, Role::Leader);
        assert_eq!(second, Role::Follower);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_keys_run_independently() {
        let registry = InFlightRegistry::new();
        let (_, a) = registry.join_or_start(&key(b"a"), never);
        let (_, b) = registry.join_or_start(&key(b"b"), never);
        assert_eq!((a, b), (Role::Leader, Role::Leader));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_guard_drop_allows_a_fresh_start() {
        let registry = Arc::new(InFlightRegistry::new());
        let guard = InFlightGuard::new(registry.clone(), key(b"a"));
        registry.join_or_start(&key(b"a"), never);
        drop(guard);

        assert_eq!(registry.len(), 0);
        let (_, role) = registry.join_or_start(&key(b"a"), never);
        assert_eq!(role, Role::Leader);
    }

    #[tokio::test]
    async fn test_all_waiters_observe_one_outcome() {
        let registry = InFlightRegistry::new();
        let err = ModerationError::ModelUnavailable("offline".into());
        let failing = err.clone();

        let (leader, _) = registry.join_or_start(&key(b"a"), move || {
            async move { Err(failing) }.boxed()
        });
        let (follower, _) = registry.join_or_start(&key(b"a"), never);

        assert_eq!(leader.await, Err(err.clone()));
        assert_eq!(follower.await, Err(err));
    }
}
