use anyhow::{Context, Result};
use reqwest::{Client, Request, Response};
use std::time::Duration;

use crate::error::ApiError;

/// HTTP client for the video platform with retry logic
pub struct PlatformHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Maximum number of retries
    max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    base_delay_ms: u64,
}

impl PlatformHttpClient {
    /// Create a new HTTP client
    pub fn new(connect_timeout: u64, request_timeout: u64, max_retries: u32) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            max_retries,
            base_delay_ms: 1000, // 1 second base delay
        })
    }

    /// Override the backoff base delay
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Execute a request with retry logic
    /// - 429 and 5xx: exponential backoff
    /// - transport errors: exponential backoff
    /// - other non-success statuses fail immediately
    pub async fn request_with_retry(&self, request: Request) -> Result<Response, ApiError> {
        let mut attempt = 0;

        let method = request.method().clone();
        let url = request.url().clone();
        // Query strings carry ids only; tokens travel in headers
        tracing::debug!(method = %method, path = %url.path(), "Sending platform request");

        loop {
            let req = request.try_clone().ok_or_else(|| {
                ApiError::Internal(anyhow::anyhow!("Request body is not cloneable"))
            })?;

            match self.client.execute(req).await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        tracing::debug!(status = %status, path = %url.path(), "Platform request successful");
                        return Ok(response);
                    }

                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if retryable && attempt < self.max_retries {
                        let delay = self.calculate_backoff_delay(attempt);
                        tracing::warn!(
                            "Received {}, retrying after {}ms (attempt {}/{})",
                            status,
                            delay,
                            attempt + 1,
                            self.max_retries
                        );

                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    tracing::error!(
                        status = status.as_u16(),
                        path = %url.path(),
                        response_body = %error_text,
                        attempt = attempt + 1,
                        "Platform request failed with error response"
                    );

                    return Err(ApiError::PlatformApiError {
                        status: status.as_u16(),
                        message: extract_error_message(&error_text),
                    });
                }

                Err(e) => {
                    let error_kind = if e.is_timeout() {
                        "timeout"
                    } else if e.is_connect() {
                        "connection_failed"
                    } else if e.is_request() {
                        "request_error"
                    } else if e.is_body() {
                        "body_error"
                    } else if e.is_decode() {
                        "decode_error"
                    } else {
                        "unknown"
                    };

                    if attempt < self.max_retries {
                        let delay = self.calculate_backoff_delay(attempt);
                        tracing::warn!(
                            error_kind = error_kind,
                            error = %e,
                            "Platform request failed, retrying after {}ms (attempt {}/{})",
                            delay,
                            attempt + 1,
                            self.max_retries
                        );

                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }

                    tracing::error!(
                        error_kind = error_kind,
                        error = %e,
                        path = %url.path(),
                        total_attempts = attempt + 1,
                        "Platform request failed after all retries"
                    );

                    return Err(ApiError::Internal(anyhow::anyhow!(
                        "HTTP request failed: {} (kind: {})",
                        e,
                        error_kind
                    )));
                }
            }
        }
    }

    /// Calculate exponential backoff delay
    fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        // base_delay * 2^attempt plus up to 10% jitter
        let delay = self.base_delay_ms * 2_u64.pow(attempt);
        let jitter = (delay as f64 * 0.1 * rand::random::<f64>()) as u64;
        delay + jitter
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Pull the human-readable message out of a platform error body
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            let error = json.get("error")?;
            error
                .get("message")
                .or_else(|| json.get("error_description"))
                .and_then(|m| m.as_str())
                .or_else(|| error.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}
