//! HTTP collaborator that reads metrics from the dashboard backend.

use std::time::Duration;

use dash_data::{CacheKey, FetchError, FetchFuture, Fetcher};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::error::CliError;

/// Longest error body kept in a status error.
const MAX_ERROR_BODY: usize = 256;

/// Fetches `GET {base}/api/sources/{source}/{metric}` and decodes the JSON body.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    /// Create a fetcher for the backend at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CliError> {
        let base_url = base_url.into();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(CliError::Config(format!(
                "backend URL must start with http:// or https://, got `{base_url}`"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CliError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// URL queried for `key`.
    #[must_use]
    pub fn url_for(&self, key: &CacheKey) -> String {
        format!(
            "{}/api/sources/{}/{}",
            self.base_url, key.source_id, key.metric
        )
    }
}

impl Fetcher<Value> for HttpFetcher {
    fn fetch(&self, key: &CacheKey) -> FetchFuture<Value> {
        let client = self.client.clone();
        let url = self.url_for(key);

        Box::pin(async move {
            debug!(%url, "requesting metric");
            let response = client
                .get(&url)
                .send()
                .await
                .map_err(|e| FetchError::transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(classify_status(status, &body));
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| FetchError::transport(e.to_string()))?;
            serde_json::from_slice(&body).map_err(|e| FetchError::decode(e.to_string()))
        })
    }
}

/// Map a non-success status to a fetch error.
fn classify_status(status: StatusCode, body: &str) -> FetchError {
    let mut detail: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
    if detail.is_empty() {
        detail = status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::unauthorized(detail),
        _ => FetchError::status(status.as_u16(), detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(base: &str) -> HttpFetcher {
        HttpFetcher::new(base, Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_url_layout() {
        let key = CacheKey::new("proxmox-1", "cpu");
        assert_eq!(
            fetcher("http://dash.lan:3000").url_for(&key),
            "http://dash.lan:3000/api/sources/proxmox-1/cpu"
        );
        assert_eq!(
            fetcher("http://dash.lan:3000/").url_for(&key),
            "http://dash.lan:3000/api/sources/proxmox-1/cpu"
        );
    }

    #[test]
    fn test_non_http_backend_is_rejected() {
        let err = HttpFetcher::new("ws://dash.lan", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_auth_statuses_are_unauthorized() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad token"),
            FetchError::Unauthorized { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, ""),
            FetchError::Unauthorized { .. }
        ));
    }

    #[test]
    fn test_other_statuses_keep_their_code() {
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, "  pve down \n"),
            FetchError::status(503, "pve down")
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, ""),
            FetchError::status(404, "Not Found")
        );
    }

    #[test]
    fn test_long_error_bodies_are_truncated() {
        let body = "x".repeat(MAX_ERROR_BODY * 2);
        match classify_status(StatusCode::INTERNAL_SERVER_ERROR, &body) {
            FetchError::Status { code, message } => {
                assert_eq!(code, 500);
                assert_eq!(message.len(), MAX_ERROR_BODY);
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        // nothing listens on port 9 on loopback
        let err = fetcher("http://127.0.0.1:9")
            .fetch(&CacheKey::new("unifi", "clients"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
        assert!(err.is_transient());
    }
}
