//! Request deduplication cache.
//!
//! At most one request per [`CacheKey`] is in flight at any time. Callers that
//! ask for a key while a request is pending join it and observe the same
//! settlement. Entries exist only while their request is in flight: they are
//! removed when the request settles, and [`RequestCache::sweep_stale`] evicts
//! any entry that outlives the configured maximum age.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::DataConfig;
use crate::error::{FetchError, FetchResult};
use crate::fetcher::FetchFuture;
use crate::types::CacheKey;

/// A handle on an in-flight request. Every clone resolves to the same result.
pub type SharedFetch<V> = Shared<Pin<Box<dyn Future<Output = FetchResult<V>> + Send>>>;

/// Counters describing cache activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests actually issued to a collaborator.
    pub fetches: u64,
    /// Callers that joined an existing in-flight request.
    pub joins: u64,
    /// Entries removed by the stale sweep.
    pub evictions: u64,
}

struct CacheEntry<V> {
    pending: SharedFetch<V>,
    created_at: Instant,
    generation: u64,
}

struct CacheInner<V> {
    entries: Mutex<HashMap<CacheKey, CacheEntry<V>>>,
    max_age: Duration,
    next_generation: AtomicU64,
    fetches: AtomicU64,
    joins: AtomicU64,
    evictions: AtomicU64,
}

impl<V> CacheInner<V> {
    /// Remove the entry for `key` if it is still the one created by `generation`.
    fn settle(&self, key: &CacheKey, generation: u64) {
        let mut entries = self.entries.lock();
        if entries
            .get(key)
            .is_some_and(|entry| entry.generation == generation)
        {
            entries.remove(key);
            debug!(key = %key, generation, "request settled");
        } else {
            debug!(key = %key, generation, "settled request no longer cached");
        }
    }
}

/// Removes the cache entry when the request task finishes, panics or is dropped.
struct SettleGuard<V> {
    cache: Weak<CacheInner<V>>,
    key: CacheKey,
    generation: u64,
}

impl<V> Drop for SettleGuard<V> {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.settle(&self.key, self.generation);
        }
    }
}

/// Deduplicates concurrent requests for the same `(source, metric)` pair.
///
/// Cloning the cache is cheap; clones share the same entries.
pub struct RequestCache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for RequestCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for RequestCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("in_flight", &self.inner.entries.lock().len())
            .field("max_age", &self.inner.max_age)
            .finish()
    }
}

impl<V> RequestCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty cache whose entries are considered stale after `max_age`.
    #[must_use]
    pub fn new(max_age: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                max_age,
                next_generation: AtomicU64::new(0),
                fetches: AtomicU64::new(0),
                joins: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        }
    }

    /// Creates an empty cache using `config.max_entry_age`.
    #[must_use]
    pub fn from_config(config: &DataConfig) -> Self {
        Self::new(config.max_entry_age)
    }

    /// Returns the in-flight request for `key`, starting one with `fetch` if
    /// none exists.
    ///
    /// The request runs on its own tokio task, so it completes even if every
    /// caller drops the returned future. `fetch` is called with the cache
    /// locked and must not call back into the cache.
    ///
    /// Must be called from within a tokio runtime.
    pub fn acquire<F>(&self, key: &CacheKey, fetch: F) -> SharedFetch<V>
    where
        F: FnOnce() -> FetchFuture<V>,
    {
        let mut entries = self.inner.entries.lock();

        if let Some(entry) = entries.get(key) {
            self.inner.joins.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, generation = entry.generation, "joining in-flight request");
            return entry.pending.clone();
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        self.inner.fetches.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, generation, "issuing request");

        let request = fetch();
        let guard = SettleGuard {
            cache: Arc::downgrade(&self.inner),
            key: key.clone(),
            generation,
        };
        let task = tokio::spawn(async move {
            let _guard = guard;
            request.await
        });

        let task_key = key.to_string();
        let pending: Pin<Box<dyn Future<Output = FetchResult<V>> + Send>> = Box::pin(async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(key = %task_key, error = %e, "request task ended without a result");
                    Err(FetchError::Abandoned { key: task_key })
                }
            }
        });
        let pending = pending.shared();

        entries.insert(
            key.clone(),
            CacheEntry {
                pending: pending.clone(),
                created_at: Instant::now(),
                generation,
            },
        );

        pending
    }

    /// Evicts every entry older than the maximum age.
    ///
    /// Requests behind evicted entries keep running; a later `acquire` for the
    /// same key simply starts a fresh request. Returns the number of evictions.
    pub fn sweep_stale(&self) -> usize {
        let max_age = self.inner.max_age;
        let mut entries = self.inner.entries.lock();
        let before = entries.len();

        entries.retain(|key, entry| {
            let age = entry.created_at.elapsed();
            let keep = age <= max_age;
            if !keep {
                debug!(key = %key, age_ms = age.as_millis(), "evicting stale request");
            }
            keep
        });

        let evicted = before - entries.len();
        if evicted > 0 {
            self.inner
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Returns `true` if a request for `key` is in flight.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.entries.lock().contains_key(key)
    }

    /// Returns the number of in-flight requests.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Returns the configured maximum entry age.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        self.inner.max_age
    }

    /// Returns activity counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            fetches: self.inner.fetches.load(Ordering::Relaxed),
            joins: self.inner.joins.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    fn key() -> CacheKey {
        CacheKey::new("proxmox-1", "node-status")
    }

    async fn drain() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    /// A fetch closure that counts calls and waits on `rx` for its result.
    fn gated(
        calls: &Arc<AtomicUsize>,
        rx: oneshot::Receiver<FetchResult<u32>>,
    ) -> impl FnOnce() -> FetchFuture<u32> {
        let calls = Arc::clone(calls);
        move || -> FetchFuture<u32> {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                rx.await
                    .unwrap_or_else(|_| Err(FetchError::transport("gate dropped")))
            })
        }
    }

    fn immediate(calls: &Arc<AtomicUsize>, value: u32) -> impl FnOnce() -> FetchFuture<u32> {
        let calls = Arc::clone(calls);
        move || -> FetchFuture<u32> {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(value) })
        }
    }

    #[tokio::test]
    async fn test_concurrent_acquires_share_one_request() {
        let cache = RequestCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();

        let first = cache.acquire(&key(), gated(&calls, rx));
        let second = cache.acquire(&key(), immediate(&calls, 99));
        let third = cache.acquire(&key(), immediate(&calls, 99));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 1);

        tx.send(Ok(7)).unwrap();

        assert_eq!(first.await, Ok(7));
        assert_eq!(second.await, Ok(7));
        assert_eq!(third.await, Ok(7));

        let stats = cache.stats();
        assert_eq!(stats.fetches, 1);
        assert_eq!(stats.joins, 2);
    }

    #[tokio::test]
    async fn test_joiners_observe_the_same_failure() {
        let cache = RequestCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();

        let first = cache.acquire(&key(), gated(&calls, rx));
        let second = cache.acquire(&key(), immediate(&calls, 1));

        tx.send(Err(FetchError::transport("connection refused")))
            .unwrap();

        let expected = Err(FetchError::transport("connection refused"));
        assert_eq!(first.await, expected);
        assert_eq!(second.await, expected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_settled_entries_are_not_memoized() {
        let cache = RequestCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        assert_eq!(cache.acquire(&key(), immediate(&calls, 1)).await, Ok(1));
        assert!(!cache.contains(&key()));

        assert_eq!(cache.acquire(&key(), immediate(&calls, 2)).await, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_entries_are_removed() {
        let cache = RequestCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();

        let pending = cache.acquire(&key(), gated(&calls, rx));
        tx.send(Err(FetchError::status(500, "boom"))).unwrap();
        assert!(pending.await.is_err());

        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.acquire(&key(), immediate(&calls, 3)).await, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_share() {
        let cache = RequestCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let a = cache.acquire(&CacheKey::new("unifi", "clients"), immediate(&calls, 1));
        let b = cache.acquire(&CacheKey::new("unifi", "devices"), immediate(&calls, 2));

        assert_eq!(cache.in_flight(), 2);
        assert_eq!(a.await, Ok(1));
        assert_eq!(b.await, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_requests_that_never_settle() {
        let cache: RequestCache<u32> = RequestCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let _stuck = cache.acquire(&key(), move || -> FetchFuture<u32> {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(std::future::pending::<FetchResult<u32>>())
        });

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.sweep_stale(), 0);
        assert!(cache.contains(&key()));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.sweep_stale(), 1);
        assert!(!cache.contains(&key()));
        assert_eq!(cache.stats().evictions, 1);

        assert_eq!(cache.acquire(&key(), immediate(&calls, 5)).await, Ok(5));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_settlement_keeps_newer_entry() {
        let cache = RequestCache::new(Duration::from_secs(10));
        let calls = Arc::new(AtomicUsize::new(0));
        let (old_tx, old_rx) = oneshot::channel();
        let (new_tx, new_rx) = oneshot::channel();

        let old = cache.acquire(&key(), gated(&calls, old_rx));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.sweep_stale(), 1);

        let newer = cache.acquire(&key(), gated(&calls, new_rx));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        old_tx.send(Ok(1)).unwrap();
        assert_eq!(old.await, Ok(1));
        assert!(cache.contains(&key()));

        new_tx.send(Ok(2)).unwrap();
        assert_eq!(newer.await, Ok(2));
        assert!(!cache.contains(&key()));
    }

    #[tokio::test]
    async fn test_dropped_joiners_do_not_cancel_the_request() {
        let cache = RequestCache::new(Duration::from_secs(60));
        let completed = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<u32>();

        let done = Arc::clone(&completed);
        let pending = cache.acquire(&key(), move || -> FetchFuture<u32> {
            Box::pin(async move {
                let value = rx.await.unwrap_or_default();
                done.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            })
        });
        drop(pending);

        tx.send(4).unwrap();
        drain().await;

        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert!(!cache.contains(&key()));
    }

    #[tokio::test]
    async fn test_panicking_request_is_abandoned() {
        let cache: RequestCache<u32> = RequestCache::new(Duration::from_secs(60));

        let pending = cache.acquire(&key(), || -> FetchFuture<u32> {
            Box::pin(async {
                let broken = true;
                if broken {
                    panic!("collaborator bug");
                }
                Ok(0)
            })
        });

        let result = pending.await;
        assert!(matches!(result, Err(FetchError::Abandoned { .. })));
        assert!(!cache.contains(&key()));
    }

    #[test]
    fn test_from_config_uses_max_entry_age() {
        let config = DataConfig::new().with_max_entry_age(Duration::from_secs(5));
        let cache: RequestCache<u8> = RequestCache::from_config(&config);
        assert_eq!(cache.max_age(), Duration::from_secs(5));
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
