//! CLI error types.

use std::path::{Path, PathBuf};

use dash_data::ConfigError;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The widget file could not be read or is malformed.
    #[error("widget file {}: {reason}", path.display())]
    WidgetFile {
        /// Path of the offending file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The async runtime could not be started or failed while running.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl CliError {
    /// Create a widget file error.
    pub fn widget_file(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::WidgetFile {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_error_display_config() {
        let err = CliError::Config("bad backend".into());
        assert_eq!(err.to_string(), "configuration error: bad backend");
    }

    #[test]
    fn test_cli_error_display_widget_file() {
        let err = CliError::widget_file("/etc/dash/widgets.json", "no widgets defined");
        assert_eq!(
            err.to_string(),
            "widget file /etc/dash/widgets.json: no widgets defined"
        );
    }

    #[test]
    fn test_cli_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdout closed");
        let cli_err = CliError::from(io_err);
        assert!(matches!(cli_err, CliError::Io(_)));
    }

    #[test]
    fn test_cli_error_from_config_error() {
        let err = CliError::from(ConfigError::InvalidValue {
            field: "sweep_interval",
            reason: "must be non-zero".to_string(),
        });
        match err {
            CliError::Config(msg) => assert!(msg.contains("sweep_interval")),
            other => panic!("expected config error, got {other:?}"),
        }
    }
}
