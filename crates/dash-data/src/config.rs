//! Data subsystem configuration.

use std::time::Duration;

use crate::error::ConfigError;

/// Configuration shared by the request cache, sweeper, registry and controllers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataConfig {
    /// Cache entries older than this are evicted by the sweep.
    pub max_entry_age: Duration,
    /// Period of the stale-entry sweep.
    pub sweep_interval: Duration,
    /// Poll interval for widgets that do not choose one.
    pub default_poll_interval: Duration,
    /// Maximum concurrent refetches during a broadcast refresh (`None` means unbounded).
    pub refresh_concurrency: Option<usize>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            max_entry_age: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
            default_poll_interval: Duration::from_secs(30),
            refresh_concurrency: None,
        }
    }
}

impl DataConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum age of a cache entry.
    #[must_use]
    pub const fn with_max_entry_age(mut self, max_age: Duration) -> Self {
        self.max_entry_age = max_age;
        self
    }

    /// Set the sweep period.
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the default poll interval.
    #[must_use]
    pub const fn with_default_poll_interval(mut self, interval: Duration) -> Self {
        self.default_poll_interval = interval;
        self
    }

    /// Cap the number of concurrent refetches issued by a broadcast refresh.
    #[must_use]
    pub const fn with_refresh_concurrency(mut self, limit: Option<usize>) -> Self {
        self.refresh_concurrency = limit;
        self
    }

    /// Check that every field holds a usable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entry_age.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "max_entry_age",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "sweep_interval",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.refresh_concurrency == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "refresh_concurrency",
                reason: "must allow at least one refetch".to_string(),
            });
        }
        Ok(())
    }
}
