use thiserror::Error;

/// Result alias for GitHub operations.
pub type GitHubResult<T> = std::result::Result<T, GitHubError>;

/// Errors produced by [`crate::GitHubClient`].
#[derive(Debug, Error)]
pub enum GitHubError {
    /// Transport or rate-limiter failure.
    #[error("github transport error: {0}")]
    Transport(#[from] rate_limited_http::RateLimitError),

    /// Body read / decode failure from `reqwest`.
    #[error("github response error: {0}")]
    Http(#[from] reqwest::Error),

    /// The requested PR or repository does not exist (404).
    #[error("github resource not found: {0}")]
    NotFound(String),

    /// Authentication rejected (401).
    #[error("github authentication failed (401): check the configured token")]
    Unauthorized,

    /// Any other non-success status.
    #[error("github api error: {status} on {url}: {snippet}")]
    Api {
        status: u16,
        url: String,
        snippet: String,
    },

    /// A PR diff exceeded the configured size limit.
    ///
    /// Callers fall back to file paths only and record a null diff hash.
    #[error("pr diff too large: {bytes} bytes (limit {limit})")]
    DiffTooLarge { bytes: usize, limit: usize },

    /// Request construction failed (bad owner/repo, URL, header value).
    #[error("invalid github request: {0}")]
    Validation(String),
}
