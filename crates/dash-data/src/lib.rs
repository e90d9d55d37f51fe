//! # dash-data
//!
//! Widget data acquisition and refresh coordination for the homelab dashboard.
//!
//! Dashboard widgets are mounted and unmounted at will, and many of them watch
//! the same `(source, metric)` pair. This crate keeps their network traffic and
//! bookkeeping sane:
//!
//! - **[`RequestCache`]**: at most one in-flight request per key; concurrent
//!   callers join it and observe the same result.
//! - **[`CacheSweeper`]**: periodic eviction of requests that never settle.
//! - **[`RefreshRegistry`]**: directory of mounted consumers supporting single
//!   and broadcast refresh, plus "last updated" notifications.
//! - **[`FetchController`]**: per-widget state machine that polls through the
//!   cache, registers itself, and discards results that arrive after teardown.
//!
//! All services are explicitly constructed values; pass clones of them to the
//! controllers that need them.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use dash_data::{
//!     CacheKey, CacheSweeper, ControllerDeps, DataConfig, FetchController, FetchFuture,
//!     Fetcher, RefreshRegistry, RequestCache, WidgetTarget,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DataConfig::default();
//! let cache: RequestCache<f64> = RequestCache::from_config(&config);
//! let sweeper = CacheSweeper::from_config(cache.clone(), &config)?;
//! let registry = RefreshRegistry::from_config(&config);
//!
//! let fetcher: Arc<dyn Fetcher<f64>> = Arc::new(|_key: &CacheKey| -> FetchFuture<f64> {
//!     Box::pin(async { Ok(42.0) })
//! });
//! let deps = ControllerDeps::new(cache, registry.clone(), fetcher);
//!
//! let mut cpu = FetchController::new(
//!     WidgetTarget::new("proxmox-1", "cpu").with_poll_interval(Duration::from_secs(30)),
//!     deps,
//! );
//! cpu.activate();
//!
//! registry.refresh_all().await;
//! println!("cpu: {:?}", cpu.state().data);
//!
//! cpu.teardown();
//! sweeper.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod fetcher;
pub mod registry;
pub mod sweeper;
pub mod types;

// Re-export main types
pub use cache::{CacheStats, RequestCache, SharedFetch};
pub use config::DataConfig;
pub use controller::{ControllerDeps, FetchController, WidgetTarget};
pub use error::{ConfigError, FetchError, FetchResult};
pub use fetcher::{FetchFuture, Fetcher, OverrideProvider, StaticOverrides};
pub use registry::{
    ListenerId, Refetch, RefetchFuture, RefreshRegistry, Subscription, UpdateListener,
};
pub use sweeper::CacheSweeper;
pub use types::{CacheKey, ConsumerHandle, FetchPhase, FetchState, Timestamp};
