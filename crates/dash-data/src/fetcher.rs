//! Seams to the surrounding application: the fetch collaborator and the
//! override provider used for previews.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::error::FetchResult;
use crate::types::CacheKey;

/// Boxed future returned by a [`Fetcher`].
///
/// It is `'static` because the request cache drives it on its own task,
/// detached from whichever consumer happened to start it.
pub type FetchFuture<V> = Pin<Box<dyn Future<Output = FetchResult<V>> + Send + 'static>>;

/// Fetches the current value of a metric from a source.
///
/// The payload is opaque to the data subsystem. Implementations describe
/// failures with a [`FetchError`](crate::FetchError); the subsystem treats
/// every variant the same way.
pub trait Fetcher<V>: Send + Sync {
    /// Start fetching the value identified by `key`.
    fn fetch(&self, key: &CacheKey) -> FetchFuture<V>;
}

impl<V, F> Fetcher<V> for F
where
    F: Fn(&CacheKey) -> FetchFuture<V> + Send + Sync,
{
    fn fetch(&self, key: &CacheKey) -> FetchFuture<V> {
        self(key)
    }
}

/// Supplies precomputed values that bypass the network path.
pub trait OverrideProvider<V>: Send + Sync {
    /// Returns the fixed value for `metric`, if one exists.
    fn lookup(&self, metric: &str) -> Option<V>;
}

/// A fixed metric to value map, typically used for widget previews.
#[derive(Debug, Clone)]
pub struct StaticOverrides<V> {
    values: HashMap<String, V>,
}

impl<V> StaticOverrides<V> {
    /// Creates an empty override map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Adds a fixed value for `metric`.
    #[must_use]
    pub fn with_value(mut self, metric: impl Into<String>, value: V) -> Self {
        self.values.insert(metric.into(), value);
        self
    }

    /// Returns the number of overridden metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if nothing is overridden.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<V> Default for StaticOverrides<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync> OverrideProvider<V> for StaticOverrides<V> {
    fn lookup(&self, metric: &str) -> Option<V> {
        self.values.get(metric).cloned()
    }
}
