//! Refresh registry: a directory of mounted consumers and their refetch
//! callbacks, plus "last updated" notification fan-out.
//!
//! The registry is the single source of truth for whether a consumer can be
//! refreshed right now. A consumer is either registered or absent; operations
//! on an absent handle are silent no-ops because unmount races are normal.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::DataConfig;
use crate::error::FetchResult;
use crate::types::{ConsumerHandle, Timestamp};

/// Boxed future returned by a [`Refetch`] callback.
pub type RefetchFuture = Pin<Box<dyn Future<Output = FetchResult<()>> + Send + 'static>>;

/// Something the registry can ask to fetch its data again.
pub trait Refetch: Send + Sync {
    /// Fetch again, resolving once the attempt settled.
    fn refetch(&self) -> RefetchFuture;
}

impl<F> Refetch for F
where
    F: Fn() -> RefetchFuture + Send + Sync,
{
    fn refetch(&self) -> RefetchFuture {
        self()
    }
}

/// Observer of successful fetches, e.g. a "last updated" indicator.
pub trait UpdateListener: Send + Sync {
    /// Called synchronously from [`RefreshRegistry::record_success`].
    fn on_update(&self, handle: ConsumerHandle, at: Timestamp);
}

impl<F> UpdateListener for F
where
    F: Fn(ConsumerHandle, Timestamp) + Send + Sync,
{
    fn on_update(&self, handle: ConsumerHandle, at: Timestamp) {
        self(handle, at);
    }
}

/// Identifies a subscribed [`UpdateListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct RegisteredConsumer {
    refetch: Arc<dyn Refetch>,
    last_success_at: Option<Timestamp>,
}

struct RegistryInner {
    consumers: RwLock<HashMap<ConsumerHandle, RegisteredConsumer>>,
    /// Kept in subscription order; notifications follow it.
    listeners: RwLock<Vec<(ListenerId, Arc<dyn UpdateListener>)>>,
    next_listener: AtomicU64,
    refresh_concurrency: Option<usize>,
}

impl RegistryInner {
    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        before != listeners.len()
    }
}

/// Process-wide directory of refreshable consumers.
///
/// Construct one per application (or per test) and pass clones to every
/// controller; clones share state.
#[derive(Clone)]
pub struct RefreshRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for RefreshRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshRegistry")
            .field("consumers", &self.len())
            .field("listeners", &self.listener_count())
            .field("refresh_concurrency", &self.inner.refresh_concurrency)
            .finish()
    }
}

impl Default for RefreshRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshRegistry {
    /// Creates an empty registry with unbounded broadcast refreshes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_refresh_concurrency(None)
    }

    /// Creates an empty registry that runs at most `limit` refetches at once
    /// during [`refresh_all`](Self::refresh_all).
    #[must_use]
    pub fn with_refresh_concurrency(limit: Option<usize>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                consumers: RwLock::new(HashMap::new()),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                refresh_concurrency: limit.filter(|limit| *limit > 0),
            }),
        }
    }

    /// Creates an empty registry using `config.refresh_concurrency`.
    #[must_use]
    pub fn from_config(config: &DataConfig) -> Self {
        Self::with_refresh_concurrency(config.refresh_concurrency)
    }

    /// Registers a consumer, replacing the callback of an existing one.
    ///
    /// Re-registering never moves `last_success_at` backwards.
    pub fn register(
        &self,
        handle: ConsumerHandle,
        refetch: Arc<dyn Refetch>,
        last_success: Option<Timestamp>,
    ) {
        let mut consumers = self.inner.consumers.write();
        match consumers.get_mut(&handle) {
            Some(existing) => {
                existing.refetch = refetch;
                existing.last_success_at = existing.last_success_at.max(last_success);
                debug!(handle = %handle, "re-registered consumer");
            }
            None => {
                consumers.insert(
                    handle,
                    RegisteredConsumer {
                        refetch,
                        last_success_at: last_success,
                    },
                );
                info!(handle = %handle, total = consumers.len(), "registered consumer");
            }
        }
    }

    /// Removes a consumer. Returns `false` if it was not registered.
    pub fn unregister(&self, handle: ConsumerHandle) -> bool {
        let removed = self.inner.consumers.write().remove(&handle).is_some();
        if removed {
            info!(handle = %handle, "unregistered consumer");
        }
        removed
    }

    /// Records a successful fetch and notifies every listener.
    ///
    /// Listeners run synchronously, in subscription order, after the registry
    /// lock is released. Nothing happens for an unregistered handle.
    pub fn record_success(&self, handle: ConsumerHandle, at: Timestamp) {
        {
            let mut consumers = self.inner.consumers.write();
            let Some(consumer) = consumers.get_mut(&handle) else {
                debug!(handle = %handle, "ignoring success for unregistered consumer");
                return;
            };
            consumer.last_success_at = consumer.last_success_at.max(Some(at));
        }

        let listeners: Vec<Arc<dyn UpdateListener>> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener.on_update(handle, at);
        }
    }

    /// Refetches one consumer. Unknown handles resolve immediately.
    pub async fn refresh_one(&self, handle: ConsumerHandle) {
        let refetch = self
            .inner
            .consumers
            .read()
            .get(&handle)
            .map(|consumer| Arc::clone(&consumer.refetch));

        let Some(refetch) = refetch else {
            debug!(handle = %handle, "refresh requested for unregistered consumer");
            return;
        };

        if let Err(e) = refetch.refetch().await {
            debug!(handle = %handle, error = %e, "refresh failed");
        }
    }

    /// Refetches every registered consumer and waits for all of them.
    ///
    /// Each refetch runs on its own task, so a failing or panicking consumer
    /// cannot stop the others. Individual outcomes are logged, not returned.
    pub async fn refresh_all(&self) {
        let targets: Vec<(ConsumerHandle, Arc<dyn Refetch>)> = self
            .inner
            .consumers
            .read()
            .iter()
            .map(|(handle, consumer)| (*handle, Arc::clone(&consumer.refetch)))
            .collect();

        if targets.is_empty() {
            return;
        }

        let total = targets.len();
        let permits = self
            .inner
            .refresh_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit)));

        let tasks: Vec<_> = targets
            .into_iter()
            .map(|(handle, refetch)| {
                let permits = permits.clone();
                let task = tokio::spawn(async move {
                    let _permit = match permits {
                        Some(semaphore) => semaphore.acquire_owned().await.ok(),
                        None => None,
                    };
                    refetch.refetch().await
                });
                (handle, task)
            })
            .collect();

        let mut failed = 0usize;
        for (handle, task) in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failed += 1;
                    debug!(handle = %handle, error = %e, "refresh failed");
                }
                Err(e) => {
                    failed += 1;
                    warn!(handle = %handle, error = %e, "refresh task ended without a result");
                }
            }
        }

        info!(total, failed, "refreshed all consumers");
    }

    /// Returns when the consumer last fetched successfully.
    #[must_use]
    pub fn last_success_of(&self, handle: ConsumerHandle) -> Option<Timestamp> {
        self.inner
            .consumers
            .read()
            .get(&handle)
            .and_then(|consumer| consumer.last_success_at)
    }

    /// Subscribes a listener to success notifications.
    ///
    /// The listener stays subscribed until [`Subscription::unsubscribe`] is
    /// called or the returned guard is dropped.
    #[must_use = "dropping the subscription unsubscribes the listener"]
    pub fn subscribe(&self, listener: impl UpdateListener + 'static) -> Subscription {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        let listener: Arc<dyn UpdateListener> = Arc::new(listener);
        self.inner.listeners.write().push((id, listener));
        debug!(listener = id.0, "listener subscribed");

        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Removes a listener by id. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }

    /// Returns `true` if `handle` is registered.
    #[must_use]
    pub fn is_registered(&self, handle: ConsumerHandle) -> bool {
        self.inner.consumers.read().contains_key(&handle)
    }

    /// Returns the number of registered consumers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.consumers.read().len()
    }

    /// Returns `true` if no consumer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.consumers.read().is_empty()
    }

    /// Returns every registered handle.
    #[must_use]
    pub fn handles(&self) -> Vec<ConsumerHandle> {
        self.inner.consumers.read().keys().copied().collect()
    }

    /// Returns the number of subscribed listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }
}

/// Guard for a subscribed listener.
#[derive(Debug)]
pub struct Subscription {
    id: ListenerId,
    registry: Weak<RegistryInner>,
}

impl Subscription {
    /// Returns the listener id.
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Removes the listener.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove_listener(self.id) {
                debug!(listener = self.id.0, "listener unsubscribed");
            }
        }
    }
}
