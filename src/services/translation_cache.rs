// Translation Result Cache
//
// Fingerprint-keyed cache of validated translations with LRU eviction and TTL.
// Concurrent requests for the same fingerprint share one in-flight
// computation, so the generator is called at most once per fingerprint.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::api::middleware::AppError;
use crate::models::TranslationResult;

type SharedComputation = Shared<BoxFuture<'static, Result<TranslationResult, AppError>>>;

/// Cached translation with metadata
#[derive(Debug, Clone)]
struct CachedResult {
    result: TranslationResult,
    cached_at: Instant,
    last_accessed: Instant,
    /// Number of times this cache entry was hit
    hit_count: u64,
}

impl CachedResult {
    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.map_or(false, |ttl| self.cached_at.elapsed() > ttl)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Requests answered from a stored result
    pub hits: u64,
    /// Requests that started a computation
    pub misses: u64,
    /// Requests that joined a computation already in flight
    pub joins: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0); joined requests count as hits
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.joins + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.joins) as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CachedResult>,
    in_flight: HashMap<String, SharedComputation>,
    stats: CacheStats,
}

/// Translation cache with single-flight computation, LRU eviction and TTL
///
/// Features:
/// - At most one concurrent computation per fingerprint
/// - Computations run on their own task and finish even if every caller goes away
/// - Accepted and rejected results are stored; errors are not
/// - LRU eviction when full, TTL-based expiration
pub struct TranslationCache {
    state: Arc<Mutex<CacheState>>,
    /// Maximum number of stored results
    max_entries: usize,
    /// `None` keeps results until evicted
    ttl: Option<Duration>,
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TranslationCache {
    /// Create a new translation cache
    ///
    /// # Arguments
    ///
    /// * `max_entries` - Maximum number of stored results (at least 1)
    /// * `ttl_secs` - How long a stored result is served; 0 disables expiry
    pub fn new(max_entries: usize, ttl_secs: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            max_entries: max_entries.max(1),
            ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
        }
    }

    /// Test hook for sub-second expiry
    #[cfg(test)]
    fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Return the stored result for `fingerprint`, or run `compute` to produce it.
    ///
    /// If a computation for the same fingerprint is already running, this call
    /// waits for it instead of starting another. `compute` is only invoked on a
    /// miss, and its future runs on a spawned task.
    pub async fn get_or_compute<F, Fut>(&self, fingerprint: &str, compute: F) -> Result<TranslationResult, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TranslationResult, AppError>> + Send + 'static,
    {
        let computation = {
            let mut state = lock(&self.state);

            if let Some(result) = self.lookup(&mut state, fingerprint) {
                return Ok(result);
            }

            if let Some(running) = state.in_flight.get(fingerprint).cloned() {
                state.stats.joins += 1;
                tracing::debug!("Joining in-flight translation for {}", fingerprint);
                running
            } else {
                state.stats.misses += 1;
                tracing::debug!("Cache miss for {}, starting translation", fingerprint);

                let computation = self.spawn_computation(fingerprint.to_string(), compute());
                state.in_flight.insert(fingerprint.to_string(), computation.clone());
                computation
            }
        };

        computation.await
    }

    /// Spawned before the in-flight entry is registered; the task cannot
    /// finish its bookkeeping until the caller releases the lock.
    fn spawn_computation<Fut>(&self, fingerprint: String, future: Fut) -> SharedComputation
    where
        Fut: Future<Output = Result<TranslationResult, AppError>> + Send + 'static,
    {
        let task_state = Arc::clone(&self.state);
        let task_key = fingerprint.clone();
        let max_entries = self.max_entries;

        let handle = tokio::spawn(async move {
            let outcome = future.await;

            let mut state = lock(&task_state);
            state.in_flight.remove(&task_key);
            match &outcome {
                Ok(result) => Self::store(&mut state, task_key, result.clone(), max_entries),
                Err(e) => tracing::warn!("Translation for {} failed, not caching: {}", task_key, e),
            }
            outcome
        });

        let join_state = Arc::clone(&self.state);
        async move {
            handle.await.unwrap_or_else(|e| {
                lock(&join_state).in_flight.remove(&fingerprint);
                Err(AppError::Internal(format!("Translation task failed: {}", e)))
            })
        }
        .boxed()
        .shared()
    }

    /// Stored, unexpired result; counts a hit and refreshes LRU order.
    fn lookup(&self, state: &mut CacheState, fingerprint: &str) -> Option<TranslationResult> {
        let expired = match state.entries.get_mut(fingerprint) {
            Some(cached) if cached.is_expired(self.ttl) => true,
            Some(cached) => {
                cached.hit_count += 1;
                cached.last_accessed = Instant::now();
                let result = cached.result.clone();
                tracing::debug!("Cache hit for {} (hit_count: {})", fingerprint, cached.hit_count);
                state.stats.hits += 1;
                return Some(result);
            }
            None => false,
        };

        if expired {
            state.entries.remove(fingerprint);
            state.stats.expirations += 1;
            tracing::debug!("Cache expired for {}", fingerprint);
        }
        None
    }

    fn store(state: &mut CacheState, fingerprint: String, result: TranslationResult, max_entries: usize) {
        if state.entries.len() >= max_entries && !state.entries.contains_key(&fingerprint) {
            Self::evict_lru(state);
        }

        let now = Instant::now();
        state.entries.insert(
            fingerprint.clone(),
            CachedResult {
                result,
                cached_at: now,
                last_accessed: now,
                hit_count: 0,
            },
        );

        tracing::debug!("Cached translation {} (cache size: {})", fingerprint, state.entries.len());
    }

    /// Evict least recently used entry
    fn evict_lru(state: &mut CacheState) {
        let oldest = state
            .entries
            .iter()
            .min_by_key(|(_, cached)| cached.last_accessed)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            state.entries.remove(&key);
            state.stats.evictions += 1;
            tracing::debug!("Evicted cache entry: {}", key);
        }
    }

    /// Stored result without computing or touching statistics
    pub fn peek(&self, fingerprint: &str) -> Option<TranslationResult> {
        let state = lock(&self.state);
        state
            .entries
            .get(fingerprint)
            .filter(|cached| !cached.is_expired(self.ttl))
            .map(|cached| cached.result.clone())
    }

    /// Drop every stored result. In-flight computations are unaffected.
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        let count = state.entries.len();
        state.entries.clear();

        tracing::info!("Cleared {} cache entries", count);
    }

    /// Remove expired entries
    pub fn cleanup_expired(&self) {
        let mut state = lock(&self.state);
        let ttl = self.ttl;
        let before = state.entries.len();
        state.entries.retain(|_, cached| !cached.is_expired(ttl));

        let removed = before - state.entries.len();
        state.stats.expirations += removed as u64;
        if removed > 0 {
            tracing::info!("Cleaned up {} expired cache entries", removed);
        }
    }

    pub fn get_stats(&self) -> CacheStats {
        lock(&self.state).stats.clone()
    }

    /// Current number of stored results
    pub fn size(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.state).in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RejectionReason;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn accepted() -> TranslationResult {
        TranslationResult::accepted(
            "SELECT COUNT(*) FROM transactions",
            "Rows = COUNTROWS(transactions)",
        )
    }

    /// Returns `result` after `delay`, counting invocations
    fn counted(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
        result: Result<TranslationResult, AppError>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<TranslationResult, AppError>> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(delay).await;
                result
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_cache_creation() {
        let cache = TranslationCache::new(100, 60);
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.max_entries, 100);
        assert!(cache.peek("missing").is_none());
    }

    #[tokio::test]
    async fn test_repeated_requests_compute_once() {
        let cache = TranslationCache::new(10, 60);
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_or_compute("fp", counted(&calls, Duration::ZERO, Ok(accepted())))
            .await
            .unwrap();
        let second = cache
            .get_or_compute("fp", counted(&calls, Duration::ZERO, Ok(accepted())))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.get_stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_join_one_computation() {
        let cache = Arc::new(TranslationCache::new(10, 60));
        let calls = Arc::new(AtomicUsize::new(0));

        let requests = (0..10).map(|_| {
            let cache = Arc::clone(&cache);
            let compute = counted(&calls, Duration::from_millis(50), Ok(accepted()));
            async move { cache.get_or_compute("fp", compute).await }
        });
        let results = futures::future::join_all(requests).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| matches!(r, Ok(result) if *result == accepted())));

        let stats = cache.get_stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.joins, 9);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_different_fingerprints_are_independent() {
        let cache = TranslationCache::new(10, 60);
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            cache.get_or_compute("a", counted(&calls, Duration::from_millis(20), Ok(accepted()))),
            cache.get_or_compute("b", counted(&calls, Duration::from_millis(20), Ok(accepted()))),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.size(), 2);
    }

    #[tokio::test]
    async fn test_rejections_are_cached() {
        let cache = TranslationCache::new(10, 60);
        let calls = Arc::new(AtomicUsize::new(0));
        let rejected = TranslationResult::rejected("", "", RejectionReason::EmptyGeneration);

        for _ in 0..3 {
            let result = cache
                .get_or_compute("fp", counted(&calls, Duration::ZERO, Ok(rejected.clone())))
                .await
                .unwrap();
            assert_eq!(result, rejected);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = TranslationCache::new(10, 60);
        let calls = Arc::new(AtomicUsize::new(0));

        let result = cache
            .get_or_compute(
                "fp",
                counted(
                    &calls,
                    Duration::ZERO,
                    Err(AppError::GenerationTimeout("slow".to_string())),
                ),
            )
            .await;
        assert!(matches!(result, Err(AppError::GenerationTimeout(_))));
        assert!(cache.peek("fp").is_none());

        let result = cache
            .get_or_compute("fp", counted(&calls, Duration::ZERO, Ok(accepted())))
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_abandoned_request_still_populates_cache() {
        let cache = Arc::new(TranslationCache::new(10, 60));
        let calls = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let cache = Arc::clone(&cache);
            let compute = counted(&calls, Duration::from_millis(50), Ok(accepted()));
            tokio::spawn(async move { cache.get_or_compute("fp", compute).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.peek("fp"), Some(accepted()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_expiration() {
        let cache = TranslationCache::new(10, 60).with_ttl(Duration::from_millis(50));
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_compute("fp", counted(&calls, Duration::ZERO, Ok(accepted())))
            .await
            .unwrap();
        assert!(cache.peek("fp").is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.peek("fp").is_none());

        cache
            .get_or_compute("fp", counted(&calls, Duration::ZERO, Ok(accepted())))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get_stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let cache = TranslationCache::new(10, 0);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            cache
                .get_or_compute("fp", counted(&calls, Duration::ZERO, Ok(accepted())))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cache.cleanup_expired();
        assert_eq!(cache.size(), 1);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get_stats().hits, 2);
        assert_eq!(cache.get_stats().expirations, 0);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let cache = TranslationCache::new(10, 60).with_ttl(Duration::from_millis(20));
        let calls = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b"] {
            cache
                .get_or_compute(key, counted(&calls, Duration::ZERO, Ok(accepted())))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.cleanup_expired();

        assert_eq!(cache.size(), 0);
        assert_eq!(cache.get_stats().expirations, 2);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = TranslationCache::new(3, 60);
        let calls = Arc::new(AtomicUsize::new(0));

        for key in ["key1", "key2", "key3"] {
            cache
                .get_or_compute(key, counted(&calls, Duration::ZERO, Ok(accepted())))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Touch key1 so key2 becomes the oldest
        cache
            .get_or_compute("key1", counted(&calls, Duration::ZERO, Ok(accepted())))
            .await
            .unwrap();
        cache
            .get_or_compute("key4", counted(&calls, Duration::ZERO, Ok(accepted())))
            .await
            .unwrap();

        assert_eq!(cache.size(), 3);
        assert!(cache.peek("key1").is_some());
        assert!(cache.peek("key2").is_none());
        assert!(cache.peek("key4").is_some());
        assert_eq!(cache.get_stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_cache_clear() {
        let cache = TranslationCache::new(10, 60);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_compute("fp", counted(&calls, Duration::ZERO, Ok(accepted())))
            .await
            .unwrap();
        cache.clear();

        assert_eq!(cache.size(), 0);
        assert!(cache.peek("fp").is_none());
    }

    #[test]
    fn test_hit_ratio() {
        let stats = CacheStats {
            hits: 2,
            misses: 1,
            joins: 1,
            ..Default::default()
        };
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_ratio(), 0.0);
    }
}
