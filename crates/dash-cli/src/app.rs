//! Dashboard wiring and the main run loop.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use dash_data::{
    CacheSweeper, ConsumerHandle, ControllerDeps, DataConfig, FetchController, Fetcher,
    OverrideProvider, RefreshRegistry, RequestCache, Subscription, Timestamp,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::error::CliError;
use crate::widgets::WidgetSpec;

/// A successful refresh reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidgetUpdate {
    /// Widget that refreshed.
    pub handle: ConsumerHandle,
    /// When it succeeded.
    pub at: Timestamp,
}

/// A running set of mounted widgets and the services they share.
pub struct Dashboard {
    cache: RequestCache<Value>,
    registry: RefreshRegistry,
    sweeper: CacheSweeper,
    widgets: Vec<FetchController<Value>>,
    labels: HashMap<ConsumerHandle, String>,
    updates: mpsc::UnboundedReceiver<WidgetUpdate>,
    subscription: Subscription,
}

impl Dashboard {
    /// Build the shared services and mount every widget.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: &DataConfig,
        specs: &[WidgetSpec],
        fetcher: Arc<dyn Fetcher<Value>>,
        overrides: Option<Arc<dyn OverrideProvider<Value>>>,
    ) -> Result<Self, CliError> {
        config.validate()?;

        let cache = RequestCache::from_config(config);
        let sweeper = CacheSweeper::from_config(cache.clone(), config)?;
        let registry = RefreshRegistry::from_config(config);

        let mut deps = ControllerDeps::new(cache.clone(), registry.clone(), fetcher);
        if let Some(overrides) = overrides {
            deps = deps.with_overrides(overrides);
        }

        let mut widgets: Vec<FetchController<Value>> = specs
            .iter()
            .map(|spec| FetchController::new(spec.target(config.default_poll_interval), deps.clone()))
            .collect();
        let labels = widgets
            .iter()
            .zip(specs)
            .map(|(widget, spec)| (widget.handle(), spec.label()))
            .collect();

        // subscribe before activating so the first results are reported
        let (tx, updates) = mpsc::unbounded_channel();
        let subscription = registry.subscribe(move |handle: ConsumerHandle, at: Timestamp| {
            let _ = tx.send(WidgetUpdate { handle, at });
        });

        for widget in &mut widgets {
            widget.activate();
        }
        info!(
            widgets = widgets.len(),
            overridden = widgets.iter().filter(|w| w.is_overridden()).count(),
            "dashboard started"
        );

        Ok(Self {
            cache,
            registry,
            sweeper,
            widgets,
            labels,
            updates,
            subscription,
        })
    }

    /// The shared refresh registry.
    #[must_use]
    pub fn registry(&self) -> &RefreshRegistry {
        &self.registry
    }

    /// The shared request cache.
    #[must_use]
    pub fn cache(&self) -> &RequestCache<Value> {
        &self.cache
    }

    /// Mounted widgets in file order.
    #[must_use]
    pub fn widgets(&self) -> &[FetchController<Value>] {
        &self.widgets
    }

    /// Wait for the next successful refresh.
    pub async fn next_update(&mut self) -> Option<WidgetUpdate> {
        self.updates.recv().await
    }

    /// Render an update as one output line.
    #[must_use]
    pub fn describe(&self, update: &WidgetUpdate) -> Option<String> {
        let label = self.labels.get(&update.handle)?;
        let widget = self.widgets.iter().find(|w| w.handle() == update.handle)?;
        let data = widget
            .state()
            .data
            .map_or_else(|| "-".to_string(), |value| value.to_string());
        Some(format!(
            "{} {label} {data}",
            update.at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ))
    }

    /// Tear down every widget, then stop the sweeper.
    pub async fn shutdown(mut self) {
        for widget in &mut self.widgets {
            widget.teardown();
        }
        self.subscription.unsubscribe();
        let stats = self.cache.stats();
        self.sweeper.shutdown().await;
        info!(
            fetches = stats.fetches,
            joins = stats.joins,
            evictions = stats.evictions,
            "dashboard stopped"
        );
    }
}

/// Drive `dashboard` until `stop` resolves, writing updates to `out`.
///
/// When `refresh_every` is set, every widget is refreshed at that period.
pub async fn run_loop<W, S>(
    mut dashboard: Dashboard,
    out: &mut W,
    refresh_every: Option<Duration>,
    stop: S,
) -> Result<(), CliError>
where
    W: Write,
    S: Future<Output = ()>,
{
    let registry = dashboard.registry().clone();
    let mut refresh_timer = refresh_every.and_then(broadcast_timer);
    tokio::pin!(stop);

    let result = loop {
        tokio::select! {
            () = &mut stop => break Ok(()),
            () = next_tick(&mut refresh_timer) => {
                info!(widgets = registry.len(), "refreshing all widgets");
                registry.refresh_all().await;
            }
            update = dashboard.next_update() => {
                let Some(update) = update else {
                    break Ok(());
                };
                if let Some(line) = dashboard.describe(&update) {
                    if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
                        break Err(CliError::Io(e));
                    }
                }
            }
        }
    };

    dashboard.shutdown().await;
    result
}

/// Interval firing one `period` from now, or `None` if that is beyond the clock's range.
fn broadcast_timer(period: Duration) -> Option<Interval> {
    let Some(first) = tokio::time::Instant::now().checked_add(period) else {
        warn!(
            period_secs = period.as_secs(),
            "refresh period out of range, broadcast refresh disabled"
        );
        return None;
    };
    let mut timer = tokio::time::interval_at(first, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(timer)
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Resolve after `run_for`, or on Ctrl-C.
pub async fn stop_signal(run_for: Option<Duration>) {
    let deadline = async {
        match run_for {
            Some(period) => tokio::time::sleep(period).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        () = deadline => info!("run duration elapsed"),
        interrupted = tokio::signal::ctrl_c() => match interrupted {
            Ok(()) => info!("interrupted"),
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C, stopping"),
        },
    }
}
