use crate::config::llm_provider::LlmProvider;

/// Configuration for one model endpoint (chat or embedding).
///
/// The same struct serves both roles; embedding-specific fields are ignored
/// by chat services and vice versa.
#[derive(Debug, Clone)]
pub struct LlmModelConfig {
    /// The LLM provider/backend (Ollama or an OpenAI-compatible API).
    pub provider: LlmProvider,

    /// Model identifier string (e.g., `"gpt-4o-mini"`, `"qwen3:14b"`).
    pub model: String,

    /// Inference endpoint base URL (without the `/v1/...` suffix).
    pub endpoint: String,

    /// Optional API key for authentication.
    pub api_key: Option<String>,

    /// Maximum number of tokens to generate.
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Optional request timeout (in seconds).
    pub timeout_secs: Option<u64>,

    /// Whether the provider's async batch protocol may be used.
    pub batch: bool,

    /// Context window used for prompt budgeting.
    pub max_context_tokens: Option<u32>,

    /// Embedding vector dimensionality (embedding configs only).
    pub dimensions: Option<usize>,
}

impl LlmModelConfig {
    /// Context window with a conservative default for budgeting.
    pub fn context_tokens(&self) -> u32 {
        self.max_context_tokens.unwrap_or(128_000)
    }
}
