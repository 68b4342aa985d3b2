use thiserror::Error;

/// Errors produced by the rate-limited client.
///
/// Throttled responses are not errors here: after exhausting retries the
/// last response is handed back for the caller to inspect.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Transport-level failure from the underlying client.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A retry was needed but the request body cannot be cloned.
    #[error("request body is not cloneable, cannot retry")]
    NotCloneable,

    /// The semaphore was closed (client shutting down).
    #[error("rate limiter closed")]
    Closed,
}
