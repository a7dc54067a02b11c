//! Inference coordinator: cache lookup, in-flight de-duplication, model fan-out
//!
//! `resolve` flow:
//! 1. derive the cache key from the request
//! 2. serve an unexpired cached verdict if there is one
//! 3. otherwise join the computation already running for the key, or start it
//! 4. the computation decodes the image once, fans out to one adapter per
//!    operation on the blocking pool, merges the results, writes the cache
//!
//! The computation runs in its own task. Callers only hold a `Shared` handle
//! to its outcome, so a caller dropping out (request deadline) leaves the
//! computation and its cache write intact for everyone else.

use chrono::Utc;
use futures::FutureExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::content_filter::{AdapterRegistry, Frame};
use crate::domain::moderation::{CacheKey, ModerationRequest, Operation, OperationResult, Sensitivity, Verdict};
use crate::error::ModerationError;
use crate::services::cache::{CacheResult, CacheStore};
use crate::services::inflight::{InFlightGuard, InFlightRegistry, Outcome, Role};

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub cache_ttl: Duration,
    pub inference_timeout: Duration,
    pub inference_workers: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            inference_timeout: Duration::from_secs(20),
            inference_workers: 4,
        }
    }
}

impl From<&Config> for CoordinatorOptions {
    fn from(config: &Config) -> Self {
        Self {
            cache_ttl: config.cache_ttl,
            inference_timeout: config.inference_timeout,
            inference_workers: config.inference_workers,
        }
    }
}

/// A resolved request
#[derive(Debug, Clone)]
pub struct Resolution {
    pub key: CacheKey,
    pub verdict: Verdict,
    /// Served straight from the cache store
    pub cached: bool,
}

#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    cache: Arc<dyn CacheStore>,
    adapters: AdapterRegistry,
    inflight: Arc<InFlightRegistry>,
    permits: Arc<Semaphore>,
    cache_ttl: Duration,
    verdict_ttl: chrono::Duration,
    inference_timeout: Duration,
    inference_workers: usize,
}

impl Coordinator {
    pub fn new(cache: Arc<dyn CacheStore>, adapters: AdapterRegistry, options: CoordinatorOptions) -> Self {
        let workers = options.inference_workers.max(1);
        let verdict_ttl = chrono::Duration::from_std(options.cache_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        Self {
            inner: Arc::new(Inner {
                cache,
                adapters,
                inflight: Arc::new(InFlightRegistry::new()),
                permits: Arc::new(Semaphore::new(workers)),
                cache_ttl: options.cache_ttl,
                verdict_ttl,
                inference_timeout: options.inference_timeout,
                inference_workers: workers,
            }),
        }
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.inner.cache
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.inner.adapters
    }

    pub fn inference_workers(&self) -> usize {
        self.inner.inference_workers
    }

    /// Computations currently running
    pub fn in_flight(&self) -> usize {
        self.inner.inflight.len()
    }

    pub async fn resolve(&self, request: &ModerationRequest) -> Result<Resolution, ModerationError> {
        let key = request.cache_key();

        if let Some(verdict) = self.inner.cached(&key).await {
            tracing::debug!(key = %key, "[coordinator] cache hit");
            return Ok(Resolution {
                key,
                verdict,
                cached: true,
            });
        }

        let (outcome, role) = self.inner.inflight.join_or_start(&key, || {
            let inner = self.inner.clone();
            let key = key.clone();
            let request = request.clone();
            let handle = tokio::spawn(async move { inner.compute(key, request).await });

            async move {
                handle.await.unwrap_or_else(|e| {
                    Err(ModerationError::ModelUnavailable(format!(
                        "inference task failed: {}",
                        e
                    )))
                })
            }
            .boxed()
        });

        if role == Role::Follower {
            tracing::debug!(key = %key, "[coordinator] joined in-flight computation");
        }

        let verdict = outcome.await?;
        Ok(Resolution {
            key,
            verdict,
            cached: false,
        })
    }

    /// Drop a cached verdict. Returns whether one was stored.
    pub async fn invalidate(&self, key: &CacheKey) -> CacheResult<bool> {
        self.inner.cache.delete(key).await
    }
}

impl Inner {
    /// Unexpired cached verdict; store errors and expired entries read as a miss
    async fn cached(&self, key: &CacheKey) -> Option<Verdict> {
        match self.cache.get(key).await {
            Ok(Some(verdict)) if verdict.is_valid_at(Utc::now()) => Some(verdict),
            Ok(Some(_)) => {
                tracing::debug!(key = %key, "[coordinator] cached verdict expired");
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "[coordinator] cache read failed, treating as miss");
                None
            }
        }
    }

    async fn compute(self: Arc<Self>, key: CacheKey, request: ModerationRequest) -> Outcome {
        let _registration = InFlightGuard::new(self.inflight.clone(), key.clone());

        // A computation that finished between our miss and our registration
        // has already published its verdict
        if let Some(verdict) = self.cached(&key).await {
            return Ok(verdict);
        }

        let started = Instant::now();
        let image = request.image().clone();
        let frame = tokio::task::spawn_blocking(move || Frame::decode(&image))
            .await
            .map_err(|e| ModerationError::ModelUnavailable(format!("decode task failed: {}", e)))??;
        let frame = Arc::new(frame);

        let sensitivity = request.sensitivity();
        let calls: Vec<_> = request
            .operations()
            .iter()
            .map(|op| self.run_adapter(op, frame.clone(), sensitivity))
            .collect();

        let results = match futures::future::try_join_all(calls).await {
            Ok(results) => results,
            Err(e) if e.is_caller_fault() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    request_id = request.request_id().unwrap_or("-"),
                    error = %e,
                    "[coordinator] inference failed, nothing cached"
                );
                return Err(e);
            }
        };

        let verdict = Verdict::merge(results, sensitivity, Utc::now(), self.verdict_ttl);

        if let Err(e) = self.cache.put(&key, &verdict, self.cache_ttl).await {
            tracing::warn!(key = %key, error = %e, "[coordinator] cache write failed");
        }

        tracing::info!(
            key = %key,
            request_id = request.request_id().unwrap_or("-"),
            operations = %request.operations(),
            flagged = verdict.flagged,
            max_score = verdict.max_score(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "[coordinator] verdict computed"
        );
        Ok(verdict)
    }

    async fn run_adapter(
        &self,
        op: Operation,
        frame: Arc<Frame>,
        sensitivity: Sensitivity,
    ) -> Result<(Operation, OperationResult), ModerationError> {
        let adapter = self.adapters.get(op).ok_or_else(|| {
            ModerationError::ModelUnavailable(format!("no model registered for '{}'", op))
        })?;

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ModerationError::ModelUnavailable("inference pool closed".to_string()))?;

        // The permit travels with the blocking call so a timed-out inference
        // still holds its worker slot until the model returns
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            adapter.score(&frame, sensitivity)
        });

        let result = tokio::time::timeout(self.inference_timeout, task)
            .await
            .map_err(|_| ModerationError::InferenceTimeout(self.inference_timeout))?
            .map_err(|e| ModerationError::ModelUnavailable(format!("{} model panicked: {}", op, e)))??;

        Ok((op, result))
    }
}
