//! Embedding provider facade with input sanitisation and chunking.
//!
//! Providers impose two per-request constraints: a token budget and an item
//! cap. Inputs are pre-sanitised (empty strings replaced with a single
//! space), truncated to the per-input token limit, then chunked to fit both
//! budgets before any request is sent.

use crate::{
    batch::BatchOptions,
    config::{LlmModelConfig, LlmProvider},
    error_handler::{Provider, ProviderError, ProviderErrorKind, Result, TokenUsage},
    services::{ollama_service::OllamaService, open_ai_service::OpenAiService},
    tokens,
};

/// Per-request token budget.
pub const MAX_TOKENS_PER_REQUEST: u32 = 250_000;
/// Per-request item cap.
pub const MAX_ITEMS_PER_REQUEST: usize = 2048;
/// Per-input token limit before truncation.
pub const MAX_TOKENS_PER_INPUT: u32 = 8_000;

/// Concrete embedding provider with enum dispatch.
#[derive(Debug)]
pub enum EmbeddingProvider {
    OpenAi(OpenAiService),
    Ollama(OllamaService),
}

impl EmbeddingProvider {
    /// Constructs a concrete provider from generic configuration.
    pub fn from_config(cfg: LlmModelConfig) -> Result<Self> {
        match cfg.provider {
            LlmProvider::OpenAI => Ok(Self::OpenAi(OpenAiService::new(cfg)?)),
            LlmProvider::Ollama => Ok(Self::Ollama(OllamaService::new(cfg)?)),
        }
    }

    /// Vector dimensionality, from config (required for embedding configs).
    pub fn dimensions(&self) -> usize {
        let cfg = match self {
            Self::OpenAi(s) => s.config(),
            Self::Ollama(s) => s.config(),
        };
        cfg.dimensions.unwrap_or(1536)
    }

    /// Whether the async batch protocol can be used.
    pub fn supports_batch(&self) -> bool {
        match self {
            Self::OpenAi(s) => s.supports_batch(),
            Self::Ollama(_) => false,
        }
    }

    /// Approximate token count for a text.
    pub fn count_tokens(&self, text: &str) -> u32 {
        tokens::count_tokens(text)
    }

    /// Embeds all inputs synchronously, chunking as needed.
    ///
    /// Output vectors are in input order, one per input.
    pub async fn embed(&self, inputs: &[String]) -> Result<(Vec<Vec<f32>>, TokenUsage)> {
        let prepared = prepare_inputs(inputs);
        let mut vectors = Vec::with_capacity(inputs.len());
        let mut usage = TokenUsage::default();

        for chunk in chunk_inputs(prepared) {
            let (mut vecs, u) = match self {
                Self::OpenAi(s) => s.embed(&chunk).await?,
                Self::Ollama(s) => s.embed(&chunk).await?,
            };
            usage.add(u);
            vectors.append(&mut vecs);
        }

        Ok((vectors, usage))
    }

    /// Embeds all inputs through the batch protocol.
    ///
    /// Chunks become batch items keyed by chunk index. Any failed chunk
    /// fails the call: unlike verification, a hole in the vector list is
    /// not recoverable downstream.
    pub async fn embed_batch(
        &self,
        inputs: &[String],
        opts: BatchOptions,
    ) -> Result<(Vec<Vec<f32>>, TokenUsage)> {
        let service = match self {
            Self::OpenAi(s) if s.supports_batch() => s,
            _ => {
                return Err(ProviderError::new(
                    self.provider_tag(),
                    ProviderErrorKind::BatchUnsupported,
                )
                .into());
            }
        };

        let chunks: Vec<(String, Vec<String>)> = chunk_inputs(prepare_inputs(inputs))
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| (i.to_string(), chunk))
            .collect();
        let chunk_count = chunks.len();

        let mut results = service.embed_batch(chunks, opts).await?;
        results.sort_by_key(|(id, _)| id.parse::<usize>().unwrap_or(usize::MAX));

        if results.len() != chunk_count {
            return Err(ProviderError::new(
                Provider::OpenAI,
                ProviderErrorKind::Decode(format!(
                    "batch returned {} chunks, expected {}",
                    results.len(),
                    chunk_count
                )),
            )
            .into());
        }

        let mut vectors = Vec::with_capacity(inputs.len());
        let mut usage = TokenUsage::default();
        for (id, result) in results {
            let (mut vecs, u) = result.map_err(|e| {
                ProviderError::new(
                    Provider::OpenAI,
                    ProviderErrorKind::Decode(format!("batch chunk {id} failed: {e}")),
                )
            })?;
            usage.add(u);
            vectors.append(&mut vecs);
        }

        Ok((vectors, usage))
    }

    fn provider_tag(&self) -> Provider {
        match self {
            Self::OpenAi(_) => Provider::OpenAI,
            Self::Ollama(_) => Provider::Ollama,
        }
    }
}

/// Sanitises and truncates inputs: empty → single space, long → clipped.
fn prepare_inputs(inputs: &[String]) -> Vec<String> {
    inputs
        .iter()
        .map(|s| {
            if s.trim().is_empty() {
                " ".to_string()
            } else {
                tokens::truncate_to_tokens(s, MAX_TOKENS_PER_INPUT).to_string()
            }
        })
        .collect()
}

/// Splits prepared inputs into chunks satisfying both per-request limits.
fn chunk_inputs(inputs: Vec<String>) -> Vec<Vec<String>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_tokens: u32 = 0;

    for input in inputs {
        let t = tokens::count_tokens(&input);
        let over_budget = current_tokens + t > MAX_TOKENS_PER_REQUEST;
        let over_items = current.len() >= MAX_ITEMS_PER_REQUEST;
        if !current.is_empty() && (over_budget || over_items) {
            chunks.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens += t;
        current.push(input);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_inputs_become_single_space() {
        let prepared = prepare_inputs(&["".into(), "  ".into(), "ok".into()]);
        assert_eq!(prepared, vec![" ", " ", "ok"]);
    }

    #[test]
    fn chunking_respects_item_cap() {
        let inputs: Vec<String> = (0..MAX_ITEMS_PER_REQUEST + 10).map(|i| i.to_string()).collect();
        let chunks = chunk_inputs(inputs);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), MAX_ITEMS_PER_REQUEST);
        assert_eq!(chunks[1].len(), 10);
    }

    #[test]
    fn chunking_respects_token_budget() {
        // 40 inputs at the per-input cap total 320k tokens, over one request's 250k.
        let big = "x".repeat(MAX_TOKENS_PER_INPUT as usize * 4);
        let inputs: Vec<String> = (0..40).map(|_| big.clone()).collect();
        let chunks = chunk_inputs(inputs);
        assert!(chunks.len() >= 2);
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, 40);
        for chunk in &chunks {
            let tokens: u32 = chunk.iter().map(|i| tokens::count_tokens(i)).sum();
            assert!(tokens <= MAX_TOKENS_PER_REQUEST);
        }
    }

    #[test]
    fn long_inputs_are_truncated() {
        let long = "y".repeat(1_000_000);
        let prepared = prepare_inputs(&[long]);
        assert!(tokens::count_tokens(&prepared[0]) <= MAX_TOKENS_PER_INPUT);
    }
}
