//! Unified error types for `ai-llm-service`.
//!
//! All provider wrappers normalize their failures into [`AiLlmError`] so that
//! callers never match on backend-specific error shapes.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for LLM operations.
pub type Result<T> = std::result::Result<T, AiLlmError>;

/// Which backend produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    OpenAI,
}

/// HTTP failure details attached to provider errors.
#[derive(Debug)]
pub struct HttpError {
    /// Numeric HTTP status code.
    pub status: StatusCode,
    /// Request URL.
    pub url: String,
    /// Short snippet of the response body.
    pub snippet: String,
}

/// Classified provider failure.
#[derive(Debug, Error)]
#[error("[AI LLM Service] {provider:?}: {kind}")]
pub struct ProviderError {
    pub provider: Provider,
    pub kind: ProviderErrorKind,
}

impl ProviderError {
    pub fn new(provider: Provider, kind: ProviderErrorKind) -> Self {
        Self { provider, kind }
    }
}

/// Failure classification shared by all providers.
#[derive(Debug, Error)]
pub enum ProviderErrorKind {
    /// The config names a different provider than the service expects.
    #[error("invalid provider for this service")]
    InvalidProvider,

    /// API key required but absent.
    #[error("missing API key")]
    MissingApiKey,

    /// Endpoint was empty or had no http/https scheme.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Non-2xx response.
    #[error("unexpected HTTP status {} from {}: {}", .0.status, .0.url, .0.snippet)]
    HttpStatus(HttpError),

    /// Response body could not be decoded into the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Chat response carried no choices.
    #[error("empty choices in chat response")]
    EmptyChoices,

    /// The operation requires batch support but the config disables it.
    #[error("batch protocol not available for this provider")]
    BatchUnsupported,

    /// An async batch reached a terminal failure state.
    #[error("batch {id} ended as {status}: {message}")]
    BatchFailed {
        id: String,
        status: String,
        message: String,
    },

    /// The async batch did not complete before the deadline.
    #[error("batch {0} exceeded the polling deadline")]
    BatchDeadline(String),
}

/// Top-level error for all LLM operations.
#[derive(Debug, Error)]
pub enum AiLlmError {
    /// Transport/client failure from `reqwest`.
    #[error("[AI LLM Service] transport error: {0}")]
    HttpTransport(#[from] reqwest::Error),

    /// Normalized provider failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Token accounting reported by providers and accumulated per scan phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Clips a response body to a log-friendly snippet.
pub fn make_snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(220) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
