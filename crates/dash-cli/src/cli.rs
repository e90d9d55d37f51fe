//! Command-line argument parsing with clap.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dash_data::{DataConfig, OverrideProvider, StaticOverrides};
use serde_json::Value;

/// Homelab dashboard poller.
///
/// Mounts the widgets listed in a widget file, keeps them fresh through a
/// shared request cache, and prints every successful update.
#[derive(Parser, Debug, Clone)]
#[command(name = "dashpoll")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Widget file to load.
    #[arg(short, long, env = "DASHPOLL_WIDGETS", default_value = "widgets.json")]
    pub widgets: PathBuf,

    /// Dashboard backend base URL.
    #[arg(short, long, env = "DASHPOLL_BACKEND", default_value = "http://localhost:3000")]
    pub backend: String,

    /// Use simulated integrations instead of the backend.
    #[arg(long)]
    pub demo: bool,

    /// Fraction of simulated requests that fail (demo mode only).
    #[arg(long, default_value_t = 0.1)]
    pub demo_failure_ratio: f64,

    /// Stop after this many seconds (0 runs until Ctrl-C).
    #[arg(long, default_value_t = 0)]
    pub duration: u64,

    /// Refresh every widget at this period in seconds.
    #[arg(long, value_name = "SECS")]
    pub refresh_all_every: Option<u64>,

    /// Evict in-flight requests older than this many seconds.
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub max_entry_age: u64,

    /// Period of the stale request sweep in seconds.
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub sweep_interval: u64,

    /// Poll period for widgets that do not set `poll_secs`.
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub default_poll: u64,

    /// Maximum concurrent refetches during a broadcast refresh.
    #[arg(long)]
    pub refresh_concurrency: Option<usize>,

    /// HTTP request timeout in seconds.
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub request_timeout: u64,

    /// Serve a fixed value for a metric instead of fetching it.
    #[arg(long = "override", value_name = "METRIC=VALUE", value_parser = parse_override)]
    pub overrides: Vec<(String, Value)>,

    /// Emit logs as JSON.
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Build the data subsystem configuration from the flags.
    #[must_use]
    pub fn data_config(&self) -> DataConfig {
        DataConfig::new()
            .with_max_entry_age(Duration::from_secs(self.max_entry_age))
            .with_sweep_interval(Duration::from_secs(self.sweep_interval))
            .with_default_poll_interval(Duration::from_secs(self.default_poll))
            .with_refresh_concurrency(self.refresh_concurrency)
    }

    /// Run duration, `None` meaning until interrupted.
    #[must_use]
    pub fn run_for(&self) -> Option<Duration> {
        (self.duration > 0).then(|| Duration::from_secs(self.duration))
    }

    /// Broadcast refresh period, if enabled.
    #[must_use]
    pub fn refresh_all_period(&self) -> Option<Duration> {
        self.refresh_all_every
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Override provider built from `--override` flags, if any were given.
    #[must_use]
    pub fn override_provider(&self) -> Option<Arc<dyn OverrideProvider<Value>>> {
        if self.overrides.is_empty() {
            return None;
        }
        let provider = self
            .overrides
            .iter()
            .fold(StaticOverrides::new(), |acc, (metric, value)| {
                acc.with_value(metric.clone(), value.clone())
            });
        Some(Arc::new(provider))
    }
}

/// Parse `METRIC=VALUE`. The value is read as JSON and falls back to a string.
fn parse_override(raw: &str) -> Result<(String, Value), String> {
    let (metric, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected METRIC=VALUE, got `{raw}`"))?;
    let metric = metric.trim();
    if metric.is_empty() {
        return Err("metric name must not be empty".to_string());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((metric.to_string(), value))
}
