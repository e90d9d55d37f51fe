//! Simulated integrations for running without a backend.

use std::time::Duration;

use chrono::Utc;
use dash_data::{CacheKey, FetchError, FetchFuture, Fetcher};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};

use crate::error::CliError;

/// Collaborator that answers after a random delay with random readings.
#[derive(Debug)]
pub struct DemoFetcher {
    rng: Mutex<StdRng>,
    failure_ratio: f64,
    min_latency: Duration,
    max_latency: Duration,
}

impl DemoFetcher {
    /// Create a demo fetcher where `failure_ratio` of requests fail.
    pub fn new(failure_ratio: f64) -> Result<Self, CliError> {
        Self::with_rng(failure_ratio, StdRng::from_entropy())
    }

    /// Create a reproducible demo fetcher.
    pub fn seeded(failure_ratio: f64, seed: u64) -> Result<Self, CliError> {
        Self::with_rng(failure_ratio, StdRng::seed_from_u64(seed))
    }

    fn with_rng(failure_ratio: f64, rng: StdRng) -> Result<Self, CliError> {
        if !(0.0..=1.0).contains(&failure_ratio) {
            return Err(CliError::Config(format!(
                "demo failure ratio must be within 0.0..=1.0, got {failure_ratio}"
            )));
        }
        Ok(Self {
            rng: Mutex::new(rng),
            failure_ratio,
            min_latency: Duration::from_millis(50),
            max_latency: Duration::from_millis(800),
        })
    }

    /// Set the simulated latency range.
    pub fn with_latency(mut self, min: Duration, max: Duration) -> Result<Self, CliError> {
        if min > max {
            return Err(CliError::Config(format!(
                "demo latency range is empty: {min:?} > {max:?}"
            )));
        }
        self.min_latency = min;
        self.max_latency = max;
        Ok(self)
    }
}

impl Fetcher<Value> for DemoFetcher {
    fn fetch(&self, key: &CacheKey) -> FetchFuture<Value> {
        let (delay, fails, reading) = {
            let mut rng = self.rng.lock();
            let delay = rng.gen_range(self.min_latency..=self.max_latency);
            (delay, rng.gen_bool(self.failure_ratio), sample(&mut *rng, &key.metric))
        };
        let key = key.clone();

        Box::pin(async move {
            tokio::time::sleep(delay).await;
            if fails {
                return Err(FetchError::status(
                    503,
                    format!("{} is not responding", key.source_id),
                ));
            }
            Ok(json!({
                "source": key.source_id,
                "metric": key.metric,
                "value": reading,
                "sampled_at": Utc::now().to_rfc3339(),
            }))
        })
    }
}

/// Plausible reading for a metric name.
fn sample<R: Rng>(rng: &mut R, metric: &str) -> Value {
    match metric {
        m if m.contains("cpu") || m.contains("memory") || m.contains("disk") => {
            json!((rng.gen_range(0.0..100.0_f64) * 10.0).round() / 10.0)
        }
        m if m.contains("temp") => json!(rng.gen_range(35..85)),
        m if m.contains("health") || m.contains("status") => {
            json!(if rng.gen_bool(0.9) { "healthy" } else { "degraded" })
        }
        _ => json!(rng.gen_range(0..10_000)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant(ratio: f64) -> DemoFetcher {
        DemoFetcher::seeded(ratio, 7)
            .unwrap()
            .with_latency(Duration::ZERO, Duration::from_millis(10))
            .unwrap()
    }

    #[test]
    fn test_ratio_outside_unit_interval_is_rejected() {
        assert!(DemoFetcher::new(1.5).is_err());
        assert!(DemoFetcher::new(-0.1).is_err());
        assert!(DemoFetcher::new(f64::NAN).is_err());
    }

    #[test]
    fn test_inverted_latency_is_rejected() {
        let err = DemoFetcher::seeded(0.0, 1)
            .unwrap()
            .with_latency(Duration::from_secs(2), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_failing_demo_returns_payloads() {
        let fetcher = instant(0.0);
        for _ in 0..20 {
            let value = fetcher
                .fetch(&CacheKey::new("proxmox-1", "cpu"))
                .await
                .unwrap();
            assert_eq!(value["source"], "proxmox-1");
            let cpu = value["value"].as_f64().unwrap();
            assert!((0.0..=100.0).contains(&cpu));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_demo_returns_status_errors() {
        let fetcher = instant(1.0);
        for _ in 0..5 {
            let err = fetcher
                .fetch(&CacheKey::new("truenas", "pool-health"))
                .await
                .unwrap_err();
            assert_eq!(err, FetchError::status(503, "truenas is not responding"));
        }
    }

    #[test]
    fn test_samples_follow_metric_kind() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(sample(&mut rng, "pool-health").is_string());
        assert!(sample(&mut rng, "cpu").is_f64());
        assert!(sample(&mut rng, "queries").is_i64());
    }
}
