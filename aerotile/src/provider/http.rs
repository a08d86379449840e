//! HTTP client abstraction for testability

use super::types::ProviderError;
use std::future::Future;
use std::time::Duration;
use tracing::{trace, warn};

/// Default User-Agent string for HTTP requests.
/// Public tile and query servers reject requests without one.
const DEFAULT_USER_AGENT: &str = concat!("aerotile/", env!("CARGO_PKG_VERSION"));

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait for asynchronous HTTP operations.
///
/// This abstraction allows dependency injection and easier testing by
/// enabling mock HTTP clients in tests.
pub trait AsyncHttpClient: Send + Sync + 'static {
    /// Performs an HTTP GET request, returning the response body.
    fn get(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, ProviderError>> + Send;

    /// Performs an HTTP POST request with a plain-text body, returning the
    /// response body.
    fn post(
        &self,
        url: &str,
        body: String,
    ) -> impl Future<Output = Result<Vec<u8>, ProviderError>> + Send;
}

/// Real async HTTP client implementation using reqwest.
#[derive(Clone)]
pub struct AsyncReqwestClient {
    client: reqwest::Client,
}

impl AsyncReqwestClient {
    /// Creates a client with the default 30 second timeout.
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Creates a client with a custom per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ProviderError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Maps a response to bytes, classifying rate-limit statuses.
    async fn read_response(
        url: &str,
        response: reqwest::Response,
    ) -> Result<Vec<u8>, ProviderError> {
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!(url = url, "Remote endpoint rate limited the request");
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            warn!(url = url, status = status.as_u16(), "HTTP error status");
            return Err(ProviderError::Http(format!("HTTP {} from {}", status, url)));
        }

        match response.bytes().await {
            Ok(bytes) => {
                trace!(url = url, bytes = bytes.len(), "HTTP response body read");
                Ok(bytes.to_vec())
            }
            Err(e) => Err(ProviderError::Http(format!(
                "Failed to read response: {}",
                e
            ))),
        }
    }
}

impl AsyncHttpClient for AsyncReqwestClient {
    async fn get(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        trace!(url = url, "HTTP GET request starting");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::Http(format!("Request failed: {}", e)))?;

        Self::read_response(url, response).await
    }

    async fn post(&self, url: &str, body: String) -> Result<Vec<u8>, ProviderError> {
        trace!(url = url, bytes = body.len(), "HTTP POST request starting");

        let response = self
            .client
            .post(url)
            .body(body)
            .send()
            .await
            .map_err(|e| ProviderError::Http(format!("POST request failed: {}", e)))?;

        Self::read_response(url, response).await
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Mock async HTTP client that replays a scripted sequence of
    /// responses. When the script runs out, the last response repeats.
    pub struct MockHttpClient {
        responses: Mutex<Vec<Result<Vec<u8>, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl MockHttpClient {
        pub fn new(responses: Vec<Result<Vec<u8>, ProviderError>>) -> Self {
            assert!(!responses.is_empty(), "mock needs at least one response");
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn always(response: Result<Vec<u8>, ProviderError>) -> Self {
            Self::new(vec![response])
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn next(&self) -> Result<Vec<u8>, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let responses = self.responses.lock().unwrap();
            responses[call.min(responses.len() - 1)].clone()
        }
    }

    impl AsyncHttpClient for MockHttpClient {
        async fn get(&self, _url: &str) -> Result<Vec<u8>, ProviderError> {
            self.next()
        }

        async fn post(&self, _url: &str, _body: String) -> Result<Vec<u8>, ProviderError> {
            self.next()
        }
    }

    #[tokio::test]
    async fn test_mock_client_replays_sequence() {
        let mock = MockHttpClient::new(vec![
            Err(ProviderError::Http("HTTP 500".into())),
            Ok(vec![1, 2, 3]),
        ]);

        assert!(mock.get("http://example.com").await.is_err());
        assert_eq!(mock.get("http://example.com").await.unwrap(), vec![1, 2, 3]);
        // Script exhausted: last response repeats
        assert_eq!(mock.get("http://example.com").await.unwrap(), vec![1, 2, 3]);
        assert_eq!(mock.calls(), 3);
    }

    #[test]
    fn test_real_client_builds() {
        assert!(AsyncReqwestClient::new().is_ok());
        assert!(AsyncReqwestClient::with_timeout(Duration::from_secs(5)).is_ok());
    }
}
