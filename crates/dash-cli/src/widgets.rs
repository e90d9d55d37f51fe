//! Widget file loading.
//!
//! A widget file lists what the dashboard shows:
//!
//! ```json
//! { "widgets": [{ "source": "proxmox-1", "metric": "cpu", "poll_secs": 30 }] }
//! ```
//!
//! `poll_secs` is optional; omitted means the configured default poll period,
//! `0` means the widget only refreshes on demand.

use std::path::Path;
use std::time::Duration;

use dash_data::WidgetTarget;
use serde::{Deserialize, Serialize};

use crate::error::CliError;

/// Parsed widget file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WidgetFile {
    /// Widgets to mount, in display order.
    pub widgets: Vec<WidgetSpec>,
}

/// One widget entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WidgetSpec {
    /// Integration source id.
    pub source: String,
    /// Metric name within the source.
    pub metric: String,
    /// Poll period in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_secs: Option<u64>,
}

impl WidgetSpec {
    /// Controller target for this widget.
    #[must_use]
    pub fn target(&self, default_poll: Duration) -> WidgetTarget {
        let target = WidgetTarget::new(self.source.clone(), self.metric.clone());
        match self.poll_secs {
            Some(0) => target,
            Some(secs) => target.with_poll_interval(Duration::from_secs(secs)),
            None if default_poll.is_zero() => target,
            None => target.with_poll_interval(default_poll),
        }
    }

    /// `source/metric` label used in output.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}/{}", self.source, self.metric)
    }
}

impl WidgetFile {
    /// Read and validate a widget file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CliError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CliError::widget_file(path, e.to_string()))?;
        Self::parse(&text, path)
    }

    /// Parse and validate widget file contents. `path` is only used in errors.
    pub fn parse(text: &str, path: impl AsRef<Path>) -> Result<Self, CliError> {
        let path = path.as_ref();
        let file: Self =
            serde_json::from_str(text).map_err(|e| CliError::widget_file(path, e.to_string()))?;

        if file.widgets.is_empty() {
            return Err(CliError::widget_file(path, "no widgets defined"));
        }
        for (index, widget) in file.widgets.iter().enumerate() {
            if widget.source.trim().is_empty() || widget.metric.trim().is_empty() {
                return Err(CliError::widget_file(
                    path,
                    format!("widget {index} needs a non-empty source and metric"),
                ));
            }
        }

        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "widgets": [
            { "source": "proxmox-1", "metric": "cpu", "poll_secs": 15 },
            { "source": "pihole", "metric": "queries" },
            { "source": "truenas", "metric": "pool-health", "poll_secs": 0 }
        ]
    }"#;

    #[test]
    fn test_parse_sample_file() {
        let file = WidgetFile::parse(SAMPLE, "widgets.json").unwrap();
        assert_eq!(file.widgets.len(), 3);
        assert_eq!(file.widgets[0].label(), "proxmox-1/cpu");
        assert_eq!(file.widgets[1].poll_secs, None);
    }

    #[test]
    fn test_poll_period_resolution() {
        let file = WidgetFile::parse(SAMPLE, "widgets.json").unwrap();
        let default = Duration::from_secs(30);

        assert_eq!(
            file.widgets[0].target(default).poll_interval,
            Some(Duration::from_secs(15))
        );
        assert_eq!(file.widgets[1].target(default).poll_interval, Some(default));
        assert_eq!(file.widgets[2].target(default).poll_interval, None);
        assert_eq!(file.widgets[1].target(Duration::ZERO).poll_interval, None);
    }

    #[test]
    fn test_empty_widget_list_is_rejected() {
        let err = WidgetFile::parse(r#"{ "widgets": [] }"#, "empty.json").unwrap_err();
        assert!(err.to_string().contains("no widgets defined"));
    }

    #[test]
    fn test_blank_metric_is_rejected() {
        let err = WidgetFile::parse(
            r#"{ "widgets": [{ "source": "unifi", "metric": " " }] }"#,
            "blank.json",
        )
        .unwrap_err();
        assert!(err.to_string().contains("widget 0"));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = WidgetFile::parse(
            r#"{ "widgets": [{ "source": "unifi", "metric": "clients", "color": "red" }] }"#,
            "typo.json",
        )
        .unwrap_err();
        assert!(matches!(err, CliError::WidgetFile { .. }));
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let loaded = WidgetFile::load(file.path()).unwrap();
        assert_eq!(loaded.widgets.len(), 3);
    }

    #[test]
    fn test_missing_file_names_the_path() {
        let err = WidgetFile::load("/nonexistent/widgets.json").unwrap_err();
        assert!(err.to_string().starts_with("widget file /nonexistent/widgets.json:"));
    }
}
