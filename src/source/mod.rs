//! Upstream satellite-position API.
//!
//! [`PositionSource`] hides the transport so the poll loop can be driven by
//! a scripted source in tests. [`HttpPositionSource`] is the real one: a single
//! GET per call against a reusable `reqwest::Client` with a bounded timeout.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_SOURCE_URL: &str = "https://api.wheretheiss.at/v1/satellites/25544";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Request(String),
    #[error("unreadable response body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_decode() {
            FetchError::Body(err.to_string())
        } else {
            FetchError::Request(err.to_string())
        }
    }
}

pub trait PositionSource: Send + Sync + 'static {
    /// Fetch one raw payload. Interpretation is left to the sample adapter.
    fn fetch(&self) -> impl Future<Output = Result<Value, FetchError>> + Send;
}

pub struct HttpPositionSource {
    http: reqwest::Client,
    url: String,
}

impl HttpPositionSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PositionSource for HttpPositionSource {
    async fn fetch(&self) -> Result<Value, FetchError> {
        let response = self.http.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Body(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_client_for_configured_url() {
        let source = HttpPositionSource::new(DEFAULT_SOURCE_URL, DEFAULT_FETCH_TIMEOUT).unwrap();
        assert_eq!(source.url(), DEFAULT_SOURCE_URL);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_fetch_error() {
        // Port 9 on loopback is reserved for discard and normally closed.
        let source =
            HttpPositionSource::new("http://127.0.0.1:9/position", Duration::from_secs(2)).unwrap();

        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Request(_) | FetchError::Timeout));
    }
}
