//! HTTP transport with retry
//!
//! Requests that fail with a network error, HTTP 429 or a 5xx status are
//! retried with exponential backoff. Any other non-success status is returned
//! immediately as [`HarvestError::Http`].

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{HarvestError, Result};
use crate::storage::ImageFetcher;

pub const DEFAULT_USER_AGENT: &str = concat!("musea-harvest/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Upper bound on a single backoff pause
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    max_retries: u32,
    backoff_base: Duration,
}

impl HttpClient {
    pub fn new(user_agent: &str, timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| HarvestError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: max_retries.max(1),
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Override the base of the exponential backoff
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub async fn get_json(&self, url: &str, params: &[(String, String)]) -> Result<Value> {
        let bytes = self.get_with_retry(url, params).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| HarvestError::validation(format!("invalid JSON from {}: {}", url, e)))
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.get_with_retry(url, &[]).await
    }

    async fn get_with_retry(&self, url: &str, params: &[(String, String)]) -> Result<Vec<u8>> {
        let mut attempt = 1;
        loop {
            let (error, retry_after) = match self.get_once(url, params).await {
                Ok(bytes) => return Ok(bytes),
                Err(failure) => failure,
            };

            if !is_retryable(&error) || attempt >= self.max_retries {
                if attempt > 1 {
                    warn!(url, attempts = attempt, error = %error, "Giving up after retries");
                }
                return Err(error);
            }

            let pause = retry_after.unwrap_or_else(|| self.backoff(attempt));
            warn!(
                url,
                attempt,
                max_retries = self.max_retries,
                error = %error,
                "Request failed"
            );
            info!(url, pause_ms = pause.as_millis() as u64, "Retrying");
            tokio::time::sleep(pause).await;
            attempt += 1;
        }
    }

    async fn get_once(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> std::result::Result<Vec<u8>, (HarvestError, Option<Duration>)> {
        debug!(url, "GET");
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| (HarvestError::from(e), None))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = (status == StatusCode::TOO_MANY_REQUESTS)
                .then(|| retry_after(&response))
                .flatten();
            return Err((
                HarvestError::Http {
                    status: status.as_u16(),
                    url: response.url().to_string(),
                },
                retry_after,
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| (HarvestError::from(e), None))?;
        Ok(bytes.to_vec())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

fn is_retryable(error: &HarvestError) -> bool {
    match error {
        HarvestError::Network(_) => true,
        HarvestError::Http { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_BACKOFF))
}

#[async_trait]
impl ImageFetcher for HttpClient {
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self.get_bytes(url).await?;
        if bytes.is_empty() {
            return Err(HarvestError::image(format!("empty response body from {}", url)));
        }
        Ok(bytes)
    }
}
