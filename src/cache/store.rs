//! Cache storage with in-flight fetch coalescing.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use super::key::CacheKey;
use crate::api::ApiError;
use crate::metrics::{CacheCounters, CacheStats};

/// Default entry lifetime (5 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, ApiError>>>;

struct Entry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> Entry<V> {
    fn is_stale(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

struct PendingFetch<V> {
    /// Distinguishes this fetch from a later one registered under the same key
    id: u64,
    ttl: Duration,
    fetch: SharedFetch<V>,
}

/// Both maps live under one lock: `get_or_fetch`'s check-then-register
/// must be atomic across them.
struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    pending: HashMap<String, PendingFetch<V>>,
    next_fetch_id: u64,
}

impl<V: Clone> Inner<V> {
    /// Fresh value for `key`, evicting it if expired.
    fn fresh(&mut self, key: &str, now: Instant) -> Option<V> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_stale(now) => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }
}

/// Keyed, TTL-bounded cache of API responses.
///
/// Values are cloned out on read, so `V` is typically a small struct or an
/// `Arc` around a larger one.
pub struct DataCache<V> {
    inner: Mutex<Inner<V>>,
    default_ttl: Duration,
    counters: CacheCounters,
}

impl<V> DataCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_default_ttl(DEFAULT_TTL)
    }

    pub fn with_default_ttl(default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                pending: HashMap::new(),
                next_fetch_id: 0,
            }),
            default_ttl,
            counters: CacheCounters::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        // Critical sections never panic midway, so a poisoned map is still consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get a cached value if present and not expired.
    pub fn get(&self, key: impl Into<CacheKey>) -> Option<V> {
        let key = key.into().to_string();
        let value = self.lock().fresh(&key, Instant::now());
        match value {
            Some(_) => self.counters.hit(),
            None => self.counters.miss(),
        }
        value
    }

    /// Store a value with the default TTL.
    pub fn set(&self, key: impl Into<CacheKey>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Store a value, overwriting any existing entry.
    pub fn set_with_ttl(&self, key: impl Into<CacheKey>, value: V, ttl: Duration) {
        let key = key.into().to_string();
        self.lock().entries.insert(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Remove a single entry. No-op if absent.
    ///
    /// A fetch in flight for `key` still answers its callers but its result
    /// is not stored.
    pub fn invalidate(&self, key: impl Into<CacheKey>) {
        let key = key.into().to_string();
        let mut inner = self.lock();
        inner.pending.remove(&key);
        if inner.entries.remove(&key).is_some() {
            log::debug!("Cache: invalidated {}", key);
        }
    }

    /// Remove every entry whose key contains `pattern`, and forget matching
    /// in-flight fetches.
    pub fn invalidate_matching(&self, pattern: &str) {
        let mut inner = self.lock();
        inner.pending.retain(|key, _| !key.contains(pattern));
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.contains(pattern));
        let removed = before - inner.entries.len();
        if removed > 0 {
            log::debug!("Cache: invalidated {} entries matching {:?}", removed, pattern);
        }
    }

    /// Drop all entries and forget all in-flight fetches.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.pending.clear();
        log::debug!("Cache: cleared");
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fetches currently in flight.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// `get_or_fetch_with_ttl` using the default TTL.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: impl Into<CacheKey>,
        fetch: F,
    ) -> Result<V, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
    {
        self.get_or_fetch_with_ttl(key, fetch, self.default_ttl).await
    }

    /// Return the cached value, join a fetch already in flight for `key`, or
    /// start `fetch` and cache its result for `ttl`.
    ///
    /// Concurrent callers for the same key share a single invocation of a
    /// fetch function and all observe the same `Ok` or `Err`. Failures are
    /// not cached; the next call after a failure fetches again.
    ///
    /// `fetch` is called with the cache lock held. It must only build the
    /// future; touching this cache synchronously from inside `fetch`
    /// deadlocks. The returned future is free to use the cache.
    pub async fn get_or_fetch_with_ttl<F, Fut>(
        &self,
        key: impl Into<CacheKey>,
        fetch: F,
        ttl: Duration,
    ) -> Result<V, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
    {
        let key = key.into().to_string();

        let (fetch_id, shared) = {
            let mut inner = self.lock();

            if let Some(value) = inner.fresh(&key, Instant::now()) {
                self.counters.hit();
                return Ok(value);
            }

            if let Some(pending) = inner.pending.get(&key) {
                self.counters.coalesced();
                log::debug!("Cache: joining in-flight fetch for {}", key);
                (pending.id, pending.fetch.clone())
            } else {
                self.counters.miss();
                self.counters.fetch();
                log::debug!("Cache: fetching {}", key);

                let fetch_id = inner.next_fetch_id;
                inner.next_fetch_id += 1;

                let shared = fetch().boxed().shared();
                inner.pending.insert(
                    key.clone(),
                    PendingFetch {
                        id: fetch_id,
                        ttl,
                        fetch: shared.clone(),
                    },
                );
                (fetch_id, shared)
            }
        };

        let result = shared.await;
        self.complete(&key, fetch_id, &result);
        result
    }

    /// Settle a finished fetch. The first waiter to get here stores the
    /// value; later waiters find the record already gone.
    fn complete(&self, key: &str, fetch_id: u64, result: &Result<V, ApiError>) {
        let mut inner = self.lock();

        // Cleared or invalidated mid-flight, or already settled by another waiter
        if !inner.pending.get(key).is_some_and(|p| p.id == fetch_id) {
            return;
        }
        let Some(pending) = inner.pending.remove(key) else {
            return;
        };

        match result {
            Ok(value) => {
                inner.entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.clone(),
                        stored_at: Instant::now(),
                        ttl: pending.ttl,
                    },
                );
            }
            Err(e) => {
                self.counters.failure();
                log::warn!("Cache: fetch for {} failed: {}", key, e);
            }
        }
    }
}

impl<V> Default for DataCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[test]
    fn test_get_unknown_key_is_miss() {
        let cache: DataCache<u32> = DataCache::new();
        assert_eq!(cache.get("collection:1"), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_set_then_get() {
        let cache = DataCache::new();
        cache.set("collection:1", 7u32);
        assert_eq!(cache.get("collection:1"), Some(7));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_set_overwrites() {
        let cache = DataCache::new();
        cache.set(CacheKey::Collection("1".into()), 1u32);
        cache.set(CacheKey::Collection("1".into()), 2u32);
        assert_eq!(cache.get(CacheKey::Collection("1".into())), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_evicted() {
        let cache = DataCache::new();
        cache.set_with_ttl("k", 1u32, Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get("k"), Some(1), "still fresh at exactly ttl");

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0, "expired entry removed on read");
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_entry_ttl() {
        let cache = DataCache::with_default_ttl(Duration::from_secs(60));
        cache.set("long", 1u32);
        cache.set_with_ttl("short", 2u32, Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("long"), Some(1));
        assert_eq!(cache.get("short"), None);
    }

    #[test]
    fn test_invalidate() {
        let cache = DataCache::new();
        cache.set("a", 1u32);
        cache.invalidate("a");
        cache.invalidate("missing");
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn test_invalidate_matching() {
        let cache = DataCache::new();
        cache.set(CacheKey::Collection("42".into()), 1u32);
        cache.set(CacheKey::CollectionHistory("42".into()), 2);
        cache.set(CacheKey::CollectionModelStats("42".into()), 3);
        cache.set(CacheKey::Collection("99".into()), 4);

        cache.invalidate_matching("collection:42");

        assert_eq!(cache.get("collection:42"), None);
        assert_eq!(cache.get("collection:42:history"), None);
        assert_eq!(cache.get("collection:42:model-stats"), None);
        assert_eq!(cache.get("collection:99"), Some(4));
    }

    #[tokio::test]
    async fn test_get_or_fetch_uses_fresh_value() {
        let cache = DataCache::new();
        cache.set("k", 5u32);

        let calls = AtomicUsize::new(0);
        let value = cache
            .get_or_fetch("k", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(9) }
            })
            .await
            .unwrap();

        assert_eq!(value, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_get_or_fetch_caches_result() {
        let cache = DataCache::new();
        let value = cache.get_or_fetch("k", || async { Ok(3u32) }).await;

        assert_eq!(value, Ok(3));
        assert_eq!(cache.get("k"), Some(3));
        assert_eq!(cache.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let cache = Arc::new(DataCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            let calls = calls.clone();
            let release_rx = release_rx.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("stats", move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async move {
                            let rx = release_rx.lock().await.take();
                            if let Some(rx) = rx {
                                let _ = rx.await;
                            }
                            Ok(42u32)
                        }
                    })
                    .await
            }));
        }

        // Let every task register before the fetch completes
        while cache.stats().fetches + cache.stats().coalesced < 5 {
            tokio::task::yield_now().await;
        }
        release_tx.send(()).unwrap();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().coalesced, 4);
    }

    #[tokio::test]
    async fn test_failure_shared_and_not_cached() {
        let cache: Arc<DataCache<u32>> = Arc::new(DataCache::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch("k", move || async move {
                        let _ = release_rx.await;
                        Err(ApiError::Network("down".to_string()))
                    })
                    .await
            })
        };
        while cache.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        let second = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_fetch("k", || async { Ok(1) }).await })
        };
        while cache.stats().coalesced == 0 {
            tokio::task::yield_now().await;
        }
        release_tx.send(()).unwrap();

        let expected = Err(ApiError::Network("down".to_string()));
        assert_eq!(first.await.unwrap(), expected);
        assert_eq!(second.await.unwrap(), expected);
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.pending_count(), 0);
        assert_eq!(cache.stats().failures, 1);

        // Retry after failure issues a new fetch
        let retried = cache.get_or_fetch("k", || async { Ok(8) }).await;
        assert_eq!(retried, Ok(8));
    }

    #[tokio::test]
    async fn test_clear_mid_flight_does_not_store() {
        let cache: Arc<DataCache<u32>> = Arc::new(DataCache::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let task = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch("k", move || async move {
                        let _ = release_rx.await;
                        Ok(1)
                    })
                    .await
            })
        };
        while cache.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        cache.clear();
        release_tx.send(()).unwrap();

        assert_eq!(task.await.unwrap(), Ok(1));
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test]
    async fn test_invalidate_mid_flight_does_not_store() {
        let cache: Arc<DataCache<u32>> = Arc::new(DataCache::new());
        let key = CacheKey::OrganizationStats("org1".to_string());
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let task = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(key, move || async move {
                        let _ = release_rx.await;
                        Ok(1)
                    })
                    .await
            })
        };
        while cache.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        cache.invalidate(&key);
        assert_eq!(cache.pending_count(), 0);
        release_tx.send(()).unwrap();

        assert_eq!(task.await.unwrap(), Ok(1));
        assert_eq!(cache.get(&key), None);
    }

    #[tokio::test]
    async fn test_invalidate_matching_mid_flight_does_not_store() {
        let cache: Arc<DataCache<u32>> = Arc::new(DataCache::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let task = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch("organization:org1:stats", move || async move {
                        let _ = release_rx.await;
                        Ok(1)
                    })
                    .await
            })
        };
        while cache.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        cache.invalidate_matching("organization:org1");
        release_tx.send(()).unwrap();

        assert_eq!(task.await.unwrap(), Ok(1));
        assert_eq!(cache.get("organization:org1:stats"), None);

        // The next request fetches again instead of reusing the old result
        let value = cache
            .get_or_fetch("organization:org1:stats", || async { Ok(2) })
            .await;
        assert_eq!(value, Ok(2));
    }

    #[tokio::test]
    async fn test_fetch_future_may_use_the_cache() {
        let cache: Arc<DataCache<u32>> = Arc::new(DataCache::new());
        cache.set("base", 40);

        let inner = cache.clone();
        let value = cache
            .get_or_fetch("derived", move || async move {
                let base = inner.get("base").unwrap_or(0);
                Ok(base + 2)
            })
            .await;

        assert_eq!(value, Ok(42));
        assert_eq!(cache.get("derived"), Some(42));
    }
}
