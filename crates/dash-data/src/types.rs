//! Core types shared by the cache, registry and controllers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FetchError;

/// Wall-clock timestamp used for "last updated" bookkeeping.
pub type Timestamp = DateTime<Utc>;

/// Identifies one logical value stream: a metric queried from a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    /// Opaque identifier of the data source (e.g. `proxmox-1`).
    pub source_id: String,
    /// Opaque identifier of the queried quantity (e.g. `node-status`).
    pub metric: String,
}

impl CacheKey {
    /// Create a new cache key.
    #[must_use]
    pub fn new(source_id: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            metric: metric.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source_id, self.metric)
    }
}

/// Opaque identifier of one mounted consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerHandle(Uuid);

impl ConsumerHandle {
    /// Create a new random `ConsumerHandle`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConsumerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConsumerHandle {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of a fetch controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchPhase {
    /// Nothing has been requested yet.
    #[default]
    Idle,
    /// A request is in flight.
    Loading,
    /// The last request succeeded.
    Success,
    /// The last request failed.
    Failure,
}

impl fmt::Display for FetchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Consumer-visible snapshot of a controller's data.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchState<V> {
    /// Current phase.
    pub phase: FetchPhase,
    /// Last successfully fetched value, kept across failures.
    pub data: Option<V>,
    /// Error from the most recent attempt, cleared on success.
    pub error: Option<FetchError>,
    /// When `data` was last replaced.
    pub last_updated: Option<Timestamp>,
}

impl<V> FetchState<V> {
    /// An idle state with no data.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            phase: FetchPhase::Idle,
            data: None,
            error: None,
            last_updated: None,
        }
    }

    /// A successful state holding `data`.
    #[must_use]
    pub fn ready(data: V, at: Timestamp) -> Self {
        Self {
            phase: FetchPhase::Success,
            data: Some(data),
            error: None,
            last_updated: Some(at),
        }
    }

    /// Returns `true` while a request is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.phase == FetchPhase::Loading
    }
}

impl<V> Default for FetchState<V> {
    fn default() -> Self {
        Self::idle()
    }
}
