//! Periodic stale-entry sweep for the request cache.
//!
//! The host owns the returned [`CacheSweeper`] and stops it with
//! [`CacheSweeper::shutdown`]; dropping the handle stops the task as well.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::RequestCache;
use crate::config::DataConfig;
use crate::error::ConfigError;

/// Handle for a running sweep task.
#[derive(Debug)]
pub struct CacheSweeper {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    interval: Duration,
}

impl CacheSweeper {
    /// Start sweeping `cache` every `interval`.
    ///
    /// The first sweep happens one full interval after spawning.
    pub fn spawn<V>(cache: RequestCache<V>, interval: Duration) -> Result<Self, ConfigError>
    where
        V: Clone + Send + Sync + 'static,
    {
        if interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "sweep_interval",
                reason: "must be non-zero".to_string(),
            });
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_sweeper(cache, interval, shutdown_rx));
        info!(interval_ms = interval.as_millis(), "cache sweeper started");

        Ok(Self {
            shutdown_tx,
            task: Some(task),
            interval,
        })
    }

    /// Start sweeping `cache` every `config.sweep_interval`.
    pub fn from_config<V>(cache: RequestCache<V>, config: &DataConfig) -> Result<Self, ConfigError>
    where
        V: Clone + Send + Sync + 'static,
    {
        Self::spawn(cache, config.sweep_interval)
    }

    /// Returns the sweep period.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Check if the sweep task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the sweep task and wait for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "cache sweeper task failed");
            }
        }
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run_sweeper<V>(
    cache: RequestCache<V>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    V: Clone + Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = cache.sweep_stale();
                if evicted > 0 {
                    debug!(evicted, remaining = cache.in_flight(), "swept stale requests");
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!("cache sweeper stopped");
}
