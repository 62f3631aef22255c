use crate::error::{DocumentError, DocumentResult};
use reqwest::{Client, Response};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Number of retry attempts
    pub retry_attempts: u32,
    /// Initial retry delay in milliseconds
    pub retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds (for exponential backoff cap)
    pub max_retry_delay_ms: u64,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 30000,
            user_agent: format!("soap-validate/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Async HTTP client for remote WSDL and XSD documents
pub struct AsyncHttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl AsyncHttpClient {
    pub fn new(config: HttpClientConfig) -> DocumentResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self { client, config })
    }

    /// Download a document with retry and exponential backoff
    pub async fn download_document(&self, url: &str) -> DocumentResult<Vec<u8>> {
        let response = self.get_response_with_retry(url).await?;
        let bytes = response.bytes().await?;
        debug!(url, size = bytes.len(), "Document downloaded");
        Ok(bytes.to_vec())
    }

    async fn get_response_with_retry(&self, url: &str) -> DocumentResult<Response> {
        let mut attempt = 0;

        loop {
            match self.make_request(url).await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    // 5xx may be transient, 4xx never is
                    if status.is_server_error() && attempt < self.config.retry_attempts {
                        warn!(url, status = status.as_u16(), attempt, "Retrying download");
                        self.wait_before_retry(attempt).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(DocumentError::HttpStatus {
                        url: url.to_string(),
                        status: status.as_u16(),
                        message: format!(
                            "HTTP {}: {}",
                            status.as_u16(),
                            status.canonical_reason().unwrap_or("Unknown")
                        ),
                    });
                }
                Err(error) => {
                    if attempt < self.config.retry_attempts && self.is_retryable_error(&error) {
                        warn!(url, attempt, error = %error, "Retrying download");
                        self.wait_before_retry(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }

    /// Single request bounded by the configured timeout
    async fn make_request(&self, url: &str) -> DocumentResult<Response> {
        let request_future = self.client.get(url).send();

        timeout(
            Duration::from_secs(self.config.timeout_seconds),
            request_future,
        )
        .await
        .map_err(|_| DocumentError::Timeout {
            url: url.to_string(),
            timeout_seconds: self.config.timeout_seconds,
        })?
        .map_err(DocumentError::from)
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .config
            .retry_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt));
        Duration::from_millis(delay_ms.min(self.config.max_retry_delay_ms))
    }

    async fn wait_before_retry(&self, attempt: u32) {
        sleep(self.retry_delay(attempt)).await;
    }

    fn is_retryable_error(&self, error: &DocumentError) -> bool {
        match error {
            DocumentError::Http(reqwest_error) => {
                reqwest_error.is_timeout() || reqwest_error.is_connect() || reqwest_error.is_request()
            }
            DocumentError::Timeout { .. } => true,
            _ => false,
        }
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}
