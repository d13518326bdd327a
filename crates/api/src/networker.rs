//! JSON-over-HTTP fetching used by the price feeds.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, instrument};

/// Errors surfaced by a [`Networker`].
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} returned status {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },
}

/// Fetches a JSON document from a URL.
///
/// Credentials travel in `headers` so they never appear in URLs, errors or spans.
#[async_trait]
pub trait Networker: Send + Sync + Debug {
    async fn get_json(&self, url: &str, headers: &[(&str, &str)]) -> Result<Value, NetworkError>;
}

/// `reqwest`-backed networker.
#[derive(Debug, Clone)]
pub struct HttpNetworker {
    client: reqwest::Client,
}

impl Default for HttpNetworker {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpNetworker {
    /// Create a networker with the default 10s request timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(10))
    }

    /// Create a networker with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

#[async_trait]
impl Networker for HttpNetworker {
    #[instrument(skip(self, headers))]
    async fn get_json(&self, url: &str, headers: &[(&str, &str)]) -> Result<Value, NetworkError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request
            .send()
            .await
            .map_err(|source| NetworkError::Request {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NetworkError::Status {
                url: url.to_string(),
                status,
                body,
            });
        }

        let value: Value = response.json().await.map_err(|source| NetworkError::Request {
            url: url.to_string(),
            source,
        })?;

        debug!(url, "Fetched JSON response");
        Ok(value)
    }
}
