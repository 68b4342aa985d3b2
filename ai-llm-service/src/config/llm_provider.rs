use serde::{Deserialize, Serialize};

/// Represents the provider (backend) used for LLM inference or embeddings.
///
/// Adding more providers in the future (e.g., Anthropic, Mistral API) is done
/// by extending this enum and the dispatch enums in `chat` / `embeddings`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Local Ollama runtime for on-device inference.
    Ollama,
    /// OpenAI-compatible HTTP API (cloud).
    OpenAI,
}
