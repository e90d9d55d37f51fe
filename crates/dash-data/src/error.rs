//! Error types for the dash-data crate.

use thiserror::Error;

/// Errors produced by a fetch collaborator.
///
/// Every joiner of a shared in-flight request receives a clone of the same
/// error, so this type is `Clone` and carries owned strings only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The integration could not be reached.
    #[error("transport error: {message}")]
    Transport {
        /// What went wrong on the wire.
        message: String,
    },

    /// The integration rejected the configured credentials.
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Detail returned by the integration.
        message: String,
    },

    /// The integration answered with a non-success status.
    #[error("status {code}: {message}")]
    Status {
        /// HTTP-like status code.
        code: u16,
        /// Detail returned by the integration.
        message: String,
    },

    /// The payload could not be interpreted.
    #[error("decode error: {message}")]
    Decode {
        /// The reason decoding failed.
        message: String,
    },

    /// The in-flight task ended without producing a result.
    #[error("request for {key} was abandoned")]
    Abandoned {
        /// The cache key the request was issued for.
        key: String,
    },
}

impl FetchError {
    /// Creates a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a status error.
    #[must_use]
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Returns `true` if retrying on the next poll may succeed.
    ///
    /// Credentials and payload-shape problems will not fix themselves.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::Unauthorized { .. } | Self::Decode { .. })
    }
}

/// Errors raised while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A configuration field holds an unusable value.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// The offending field.
        field: &'static str,
        /// Why the value is rejected.
        reason: String,
    },
}

/// Result type for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_error_display_transport() {
        let err = FetchError::transport("connection refused");
        assert_eq!(err.to_string(), "transport error: connection refused");
    }

    #[test]
    fn test_error_display_status() {
        let err = FetchError::status(503, "service unavailable");
        assert_eq!(err.to_string(), "status 503: service unavailable");
    }

    #[test]
    fn test_error_display_abandoned() {
        let err = FetchError::Abandoned {
            key: "proxmox-1/node-status".to_string(),
        };
        assert_eq!(err.to_string(), "request for proxmox-1/node-status was abandoned");
    }

    #[test]
    fn test_error_display_config() {
        let err = ConfigError::InvalidValue {
            field: "sweep_interval",
            reason: "must be non-zero".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value for sweep_interval: must be non-zero"
        );
    }

    #[test_case(FetchError::transport("refused"), true ; "transport")]
    #[test_case(FetchError::status(502, "bad gateway"), true ; "status")]
    #[test_case(FetchError::Abandoned { key: "a/b".into() }, true ; "abandoned")]
    #[test_case(FetchError::unauthorized("bad token"), false ; "unauthorized")]
    #[test_case(FetchError::decode("not json"), false ; "decode")]
    fn test_transient_classification(err: FetchError, expected: bool) {
        assert_eq!(err.is_transient(), expected);
    }

    #[test]
    fn test_clones_compare_equal() {
        let err = FetchError::transport("connection refused");
        assert_eq!(err.clone(), err);
    }
}
