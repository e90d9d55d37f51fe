//! Per-widget fetch controller.
//!
//! A controller drives one consumer's data through
//! `idle -> loading -> {success, failure}` and back to `loading` on every poll
//! tick or manual refresh. All network access goes through the shared
//! [`RequestCache`], so widgets watching the same metric cost one request.
//!
//! Results that settle after [`FetchController::teardown`] or after a
//! [`FetchController::retarget`] are discarded: every attempt carries the
//! generation it was started under and only applies its result if that
//! generation is still current. Within a generation, a result is also dropped
//! when a newer attempt has already been applied, so a request that outlived
//! the cache sweep cannot overwrite fresher data.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::cache::RequestCache;
use crate::error::FetchResult;
use crate::fetcher::{Fetcher, OverrideProvider};
use crate::registry::{Refetch, RefetchFuture, RefreshRegistry};
use crate::types::{CacheKey, ConsumerHandle, FetchPhase, FetchState};

/// What a widget watches and how often.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetTarget {
    /// Source to query.
    pub source_id: String,
    /// Metric to query.
    pub metric: String,
    /// Poll period; `None` or zero leaves only manual refresh.
    pub poll_interval: Option<Duration>,
}

impl WidgetTarget {
    /// Create a target without polling.
    #[must_use]
    pub fn new(source_id: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            metric: metric.into(),
            poll_interval: None,
        }
    }

    /// Poll every `interval`.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// The cache key this target reads.
    #[must_use]
    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.source_id.clone(), self.metric.clone())
    }
}

/// Services a controller depends on.
pub struct ControllerDeps<V> {
    /// Shared request cache.
    pub cache: RequestCache<V>,
    /// Shared refresh registry.
    pub registry: RefreshRegistry,
    /// Collaborator used on cache misses.
    pub fetcher: Arc<dyn Fetcher<V>>,
    /// Fixed values that bypass the network, for previews.
    pub overrides: Option<Arc<dyn OverrideProvider<V>>>,
}

impl<V> Clone for ControllerDeps<V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            registry: self.registry.clone(),
            fetcher: Arc::clone(&self.fetcher),
            overrides: self.overrides.clone(),
        }
    }
}

impl<V> ControllerDeps<V> {
    /// Bundle the shared services.
    #[must_use]
    pub fn new(cache: RequestCache<V>, registry: RefreshRegistry, fetcher: Arc<dyn Fetcher<V>>) -> Self {
        Self {
            cache,
            registry,
            fetcher,
            overrides: None,
        }
    }

    /// Serve data from `overrides` instead of the network.
    #[must_use]
    pub fn with_overrides(mut self, overrides: Arc<dyn OverrideProvider<V>>) -> Self {
        self.overrides = Some(overrides);
        self
    }
}

#[derive(Debug)]
struct Lifecycle {
    generation: u64,
    /// Sequence number handed to the next fetch attempt.
    next_attempt: u64,
    /// Newest attempt whose result was applied.
    last_applied: u64,
    key: CacheKey,
    poll_interval: Option<Duration>,
    active: bool,
    torn_down: bool,
    overridden: bool,
}

impl Lifecycle {
    fn polling_period(&self) -> Option<Duration> {
        self.poll_interval.filter(|interval| !interval.is_zero())
    }
}

struct ControllerInner<V> {
    handle: ConsumerHandle,
    deps: ControllerDeps<V>,
    lifecycle: Mutex<Lifecycle>,
    state_tx: watch::Sender<FetchState<V>>,
}

impl<V> ControllerInner<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Apply `update` if `generation` is still current. Returns whether it was applied.
    fn transition(&self, generation: u64, update: impl FnOnce(&mut FetchState<V>)) -> bool {
        let lifecycle = self.lifecycle.lock();
        if lifecycle.torn_down || lifecycle.generation != generation {
            return false;
        }
        self.state_tx.send_modify(update);
        true
    }

    /// Apply a settled result unless the generation moved on or a newer
    /// attempt already landed. Returns whether it was applied.
    fn settle(
        &self,
        generation: u64,
        attempt: u64,
        update: impl FnOnce(&mut FetchState<V>),
    ) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.torn_down
            || lifecycle.generation != generation
            || attempt < lifecycle.last_applied
        {
            return false;
        }
        lifecycle.last_applied = attempt;
        self.state_tx.send_modify(update);
        true
    }

    fn lookup_override(&self, metric: &str) -> Option<V> {
        self.deps
            .overrides
            .as_ref()
            .and_then(|overrides| overrides.lookup(metric))
    }

    async fn fetch_once(self: Arc<Self>) -> FetchResult<()> {
        let (generation, attempt, key, overridden) = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.torn_down {
                return Ok(());
            }
            let attempt = lifecycle.next_attempt;
            lifecycle.next_attempt += 1;
            (
                lifecycle.generation,
                attempt,
                lifecycle.key.clone(),
                lifecycle.overridden,
            )
        };

        if overridden {
            if let Some(value) = self.lookup_override(&key.metric) {
                let now = Utc::now();
                self.transition(generation, |state| *state = FetchState::ready(value, now));
            }
            return Ok(());
        }

        self.transition(generation, |state| state.phase = FetchPhase::Loading);

        let fetcher = Arc::clone(&self.deps.fetcher);
        let pending = self.deps.cache.acquire(&key, || fetcher.fetch(&key));

        match pending.await {
            Ok(value) => {
                let now = Utc::now();
                let applied = self.settle(generation, attempt, |state| {
                    state.phase = FetchPhase::Success;
                    state.data = Some(value);
                    state.error = None;
                    state.last_updated = Some(now);
                });
                if applied {
                    self.deps.registry.record_success(self.handle, now);
                } else {
                    debug!(handle = %self.handle, key = %key, "discarding late result");
                }
                Ok(())
            }
            Err(e) => {
                let applied = self.settle(generation, attempt, |state| {
                    state.phase = FetchPhase::Failure;
                    state.error = Some(e.clone());
                });
                if applied {
                    warn!(handle = %self.handle, key = %key, error = %e, "fetch failed");
                } else {
                    debug!(handle = %self.handle, key = %key, "discarding late failure");
                }
                Err(e)
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let lifecycle = self.lifecycle.lock();
        !lifecycle.torn_down && lifecycle.generation == generation
    }
}

/// Registry callback that refetches through a weak reference, so a
/// registration never keeps a dropped controller alive.
struct ControllerRefetch<V> {
    inner: Weak<ControllerInner<V>>,
}

impl<V> Refetch for ControllerRefetch<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn refetch(&self) -> RefetchFuture {
        match self.inner.upgrade() {
            Some(inner) => Box::pin(inner.fetch_once()),
            None => Box::pin(async { Ok(()) }),
        }
    }
}

/// Drives data acquisition for one widget instance.
///
/// Dropping the controller tears it down.
pub struct FetchController<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<ControllerInner<V>>,
    poll_task: Option<JoinHandle<()>>,
}

impl<V> std::fmt::Debug for FetchController<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchController")
            .field("handle", &self.inner.handle)
            .field("lifecycle", &*self.inner.lifecycle.lock())
            .field("phase", &self.inner.state_tx.borrow().phase)
            .finish()
    }
}

impl<V> FetchController<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an idle controller for `target`.
    ///
    /// If an override provider has a value for the metric, the controller
    /// starts in `success` with that value and never touches the network.
    #[must_use]
    pub fn new(target: WidgetTarget, deps: ControllerDeps<V>) -> Self {
        let key = target.key();
        let override_value = deps
            .overrides
            .as_ref()
            .and_then(|overrides| overrides.lookup(&key.metric));
        let overridden = override_value.is_some();
        let initial = match override_value {
            Some(value) => FetchState::ready(value, Utc::now()),
            None => FetchState::idle(),
        };
        let (state_tx, _) = watch::channel(initial);

        Self {
            inner: Arc::new(ControllerInner {
                handle: ConsumerHandle::new(),
                deps,
                lifecycle: Mutex::new(Lifecycle {
                    generation: 0,
                    next_attempt: 1,
                    last_applied: 0,
                    key,
                    poll_interval: target.poll_interval,
                    active: false,
                    torn_down: false,
                    overridden,
                }),
                state_tx,
            }),
            poll_task: None,
        }
    }

    /// Register with the refresh registry, fetch immediately and start polling.
    ///
    /// Activating twice or after teardown does nothing. Must be called from
    /// within a tokio runtime.
    pub fn activate(&mut self) {
        let (generation, period) = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.active || lifecycle.torn_down {
                return;
            }
            lifecycle.active = true;
            if lifecycle.overridden {
                debug!(handle = %self.inner.handle, "serving override data");
                return;
            }
            (lifecycle.generation, lifecycle.polling_period())
        };

        self.start(generation, period);
    }

    fn start(&mut self, generation: u64, period: Option<Duration>) {
        let refetch: Arc<dyn Refetch> = Arc::new(ControllerRefetch {
            inner: Arc::downgrade(&self.inner),
        });
        self.inner
            .deps
            .registry
            .register(self.inner.handle, refetch, None);

        tokio::spawn(Arc::clone(&self.inner).fetch_once());

        if let Some(period) = period {
            self.poll_task = Some(spawn_poller(&self.inner, generation, period));
        }
    }

    fn stop_polling(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }

    /// Fetch now, bypassing the poll timer but not the request cache.
    ///
    /// Does nothing after teardown.
    pub async fn refetch(&self) -> FetchResult<()> {
        Arc::clone(&self.inner).fetch_once().await
    }

    /// Point the controller at a different source or metric.
    ///
    /// Displayed data is cleared, results still in flight for the old key are
    /// discarded, and an active controller re-registers and fetches the new key.
    /// The registry keeps this consumer's last success time across the switch.
    pub fn retarget(&mut self, source_id: impl Into<String>, metric: impl Into<String>) {
        let key = CacheKey::new(source_id, metric);
        let override_value = self.inner.lookup_override(&key.metric);

        let restart = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.torn_down || lifecycle.key == key {
                return;
            }
            debug!(handle = %self.inner.handle, from = %lifecycle.key, to = %key, "retargeting");
            lifecycle.generation += 1;
            lifecycle.key = key;
            lifecycle.overridden = override_value.is_some();

            let initial = match override_value {
                Some(value) => FetchState::ready(value, Utc::now()),
                None => FetchState::idle(),
            };
            self.inner.state_tx.send_replace(initial);

            (lifecycle.active && !lifecycle.overridden)
                .then_some((lifecycle.generation, lifecycle.polling_period()))
        };

        self.stop_polling();

        // re-registering upserts, keeping the recorded last success
        match restart {
            Some((generation, period)) => self.start(generation, period),
            None => {
                self.inner.deps.registry.unregister(self.inner.handle);
            }
        }
    }

    /// Stop polling, unregister and discard any result still in flight.
    ///
    /// Safe to call more than once.
    pub fn teardown(&mut self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.torn_down {
                return;
            }
            lifecycle.torn_down = true;
            lifecycle.active = false;
            lifecycle.generation += 1;
        }

        self.stop_polling();
        self.inner.deps.registry.unregister(self.inner.handle);
        debug!(handle = %self.inner.handle, "controller torn down");
    }

    /// Returns this consumer's registry handle.
    #[must_use]
    pub fn handle(&self) -> ConsumerHandle {
        self.inner.handle
    }

    /// Returns the key currently watched.
    #[must_use]
    pub fn target(&self) -> CacheKey {
        self.inner.lifecycle.lock().key.clone()
    }

    /// Returns `true` between activation and teardown.
    #[must_use]
    pub fn is_active(&self) -> bool {
        let lifecycle = self.inner.lifecycle.lock();
        lifecycle.active && !lifecycle.torn_down
    }

    /// Returns `true` if data comes from the override provider.
    #[must_use]
    pub fn is_overridden(&self) -> bool {
        self.inner.lifecycle.lock().overridden
    }

    /// Returns a snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> FetchState<V> {
        self.inner.state_tx.borrow().clone()
    }

    /// Returns a receiver woken on every state transition.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<FetchState<V>> {
        self.inner.state_tx.subscribe()
    }
}

impl<V> Drop for FetchController<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.teardown();
    }
}

fn spawn_poller<V>(inner: &Arc<ControllerInner<V>>, generation: u64, period: Duration) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // activation already issued the first fetch
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if !inner.is_current(generation) {
                break;
            }
            tokio::spawn(inner.fetch_once());
        }
    })
}
