//! Concurrency-bounded, retrying HTTP fetch wrapper.
//!
//! Every outbound call in the system goes through [`RateLimitedClient`]:
//! - a semaphore caps in-flight requests at `max_concurrent`;
//! - 429 and 403 responses are retried up to `max_retries`;
//! - the retry delay is resolved in order: caller-supplied extractor
//!   (provider-specific headers) → standard `Retry-After` → exponential
//!   backoff with full jitter, clamped to `max_backoff`.
//!
//! When retries are exhausted the last response is returned as-is so the
//! caller can inspect the status. Waiters queue on the semaphore in FIFO
//! order and permits are released when the request scope exits.

pub mod backoff;
mod errors;

pub use backoff::jittered_backoff;
pub use errors::RateLimitError;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Request, Response};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Extracts a provider-specific retry delay from a throttled response
/// (e.g. GitHub's `x-ratelimit-reset`).
pub type BackoffExtractor = dyn Fn(&Response) -> Option<Duration> + Send + Sync;

/// Tuning knobs for [`RateLimitedClient`].
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum number of requests in flight at once.
    pub max_concurrent: usize,
    /// Retries after the initial attempt for 429/403 responses.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_backoff: Duration,
    /// Upper clamp for any computed delay.
    pub max_backoff: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Shared HTTP client with bounded concurrency and throttle-aware retries.
#[derive(Clone)]
pub struct RateLimitedClient {
    http: Client,
    permits: Arc<Semaphore>,
    cfg: RateLimitConfig,
}

impl RateLimitedClient {
    /// Wraps an existing `reqwest::Client`.
    pub fn new(http: Client, cfg: RateLimitConfig) -> Self {
        let permits = Arc::new(Semaphore::new(cfg.max_concurrent.max(1)));
        Self { http, permits, cfg }
    }

    /// Access to the underlying client, for building requests.
    pub fn inner(&self) -> &Client {
        &self.http
    }

    /// Executes a request with the default backoff resolution.
    pub async fn execute(&self, request: Request) -> Result<Response, RateLimitError> {
        self.execute_with(request, None).await
    }

    /// Executes a request, consulting `extractor` first when throttled.
    ///
    /// The request must have a cloneable body (all requests in this system
    /// do): retries re-send a clone of the original.
    pub async fn execute_with(
        &self,
        request: Request,
        extractor: Option<&BackoffExtractor>,
    ) -> Result<Response, RateLimitError> {
        // Holding the permit across all attempts keeps one logical call to
        // one concurrency slot, retries included.
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| RateLimitError::Closed)?;

        let mut attempt: u32 = 0;
        loop {
            let req = match request.try_clone() {
                Some(r) => r,
                None => {
                    if attempt == 0 {
                        // First attempt can consume the original.
                        return Ok(self.http.execute(request).await?);
                    }
                    return Err(RateLimitError::NotCloneable);
                }
            };

            let response = self.http.execute(req).await?;
            let status = response.status().as_u16();

            if (status != 429 && status != 403) || attempt >= self.cfg.max_retries {
                if attempt >= self.cfg.max_retries && (status == 429 || status == 403) {
                    warn!(status, attempt, "retries exhausted, returning last response");
                }
                return Ok(response);
            }

            attempt += 1;
            let delay = extractor
                .and_then(|f| f(&response))
                .or_else(|| backoff::retry_after(&response))
                .unwrap_or_else(|| {
                    jittered_backoff(attempt, self.cfg.base_backoff, self.cfg.max_backoff)
                })
                .min(self.cfg.max_backoff);

            debug!(
                status,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "throttled, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
