//! Lightweight Ollama service for text generation and embeddings.
//!
//! This module implements a thin client for the local Ollama API:
//! - `POST {endpoint}/api/generate`   — synchronous text generation (`stream=false`)
//! - `POST {endpoint}/api/embeddings` — embeddings retrieval (one input per call)
//!
//! Ollama has no async batch protocol; the dispatch layer falls back to
//! sequential sync calls when this backend is selected.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    chat::{ChatMessage, ChatResponse},
    config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider},
    error_handler::{
        HttpError, Provider, ProviderError, ProviderErrorKind, Result, TokenUsage, make_snippet,
    },
};

/// Thin client for Ollama.
///
/// Initialized with a full [`LlmModelConfig`]. Reuses an HTTP client with a
/// configurable timeout.
#[derive(Debug)]
pub struct OllamaService {
    client: reqwest::Client,
    cfg: LlmModelConfig,
    url_generate: String,
    url_embeddings: String,
}

impl OllamaService {
    /// Creates a new [`OllamaService`] from the given config.
    ///
    /// # Errors
    /// - [`ProviderErrorKind::InvalidProvider`] if the config is not Ollama
    /// - [`ProviderErrorKind::InvalidEndpoint`] for a non-http endpoint
    pub fn new(cfg: LlmModelConfig) -> Result<Self> {
        if cfg.provider != LlmProvider::Ollama {
            return Err(
                ProviderError::new(Provider::Ollama, ProviderErrorKind::InvalidProvider).into(),
            );
        }

        let endpoint = cfg.endpoint.trim();
        if endpoint.is_empty()
            || !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            return Err(ProviderError::new(
                Provider::Ollama,
                ProviderErrorKind::InvalidEndpoint(cfg.endpoint.clone()),
            )
            .into());
        }

        let timeout = cfg
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(120));
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let base = endpoint.trim_end_matches('/').to_string();
        let url_generate = format!("{}/api/generate", base);
        let url_embeddings = format!("{}/api/embeddings", base);

        info!(
            model = %cfg.model,
            endpoint = %cfg.endpoint,
            "OllamaService initialized"
        );

        Ok(Self {
            client,
            cfg,
            url_generate,
            url_embeddings,
        })
    }

    /// The configuration this service was built from.
    pub fn config(&self) -> &LlmModelConfig {
        &self.cfg
    }

    /// Performs a non-streaming generation request via `/api/generate`.
    ///
    /// Messages are flattened into one prompt (system lines first), since
    /// `/api/generate` takes plain text rather than a message array.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        let started = Instant::now();
        let prompt = flatten_messages(messages);
        let body = GenerateRequest {
            model: &self.cfg.model,
            prompt,
            stream: false,
        };

        debug!(model = %self.cfg.model, "POST {}", self.url_generate);

        let resp = self.client.post(&self.url_generate).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(self.status_error(resp, &self.url_generate).await);
        }

        let out: GenerateResponse = resp.json().await.map_err(|e| {
            ProviderError::new(
                Provider::Ollama,
                ProviderErrorKind::Decode(format!("serde error: {e}; expected `response`")),
            )
        })?;

        info!(
            model = %self.cfg.model,
            latency_ms = started.elapsed().as_millis() as u64,
            "generation completed"
        );

        Ok(ChatResponse {
            content: out.response,
            usage: TokenUsage {
                input_tokens: out.prompt_eval_count.unwrap_or(0),
                output_tokens: out.eval_count.unwrap_or(0),
            },
        })
    }

    /// Retrieves embeddings via `/api/embeddings`, one call per input.
    pub async fn embed(&self, inputs: &[String]) -> Result<(Vec<Vec<f32>>, TokenUsage)> {
        let mut vectors = Vec::with_capacity(inputs.len());
        let mut usage = TokenUsage::default();

        for input in inputs {
            let body = EmbeddingsRequest {
                model: &self.cfg.model,
                prompt: input,
            };

            let resp = self
                .client
                .post(&self.url_embeddings)
                .json(&body)
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(self.status_error(resp, &self.url_embeddings).await);
            }

            let out: EmbeddingsResponse = resp.json().await.map_err(|e| {
                ProviderError::new(
                    Provider::Ollama,
                    ProviderErrorKind::Decode(format!("serde error: {e}; expected `embedding`")),
                )
            })?;

            usage.add(TokenUsage {
                input_tokens: crate::tokens::count_tokens(input) as u64,
                output_tokens: 0,
            });
            vectors.push(out.embedding);
        }

        Ok((vectors, usage))
    }

    async fn status_error(
        &self,
        resp: reqwest::Response,
        url: &str,
    ) -> crate::error_handler::AiLlmError {
        let status = resp.status();
        let snippet = make_snippet(&resp.text().await.unwrap_or_default());
        ProviderError::new(
            Provider::Ollama,
            ProviderErrorKind::HttpStatus(HttpError {
                status,
                url: url.to_string(),
                snippet,
            }),
        )
        .into()
    }
}

fn flatten_messages(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for m in messages {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&m.content);
    }
    out
}

/* ----------------------------- wire shapes ----------------------------- */

/// Request body for `/api/generate` (non-streaming).
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

/// Response body for `/api/generate`.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

/// Request body for `/api/embeddings`.
#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// Response body for `/api/embeddings`.
#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatRole;

    #[test]
    fn messages_flatten_in_order() {
        let msgs = vec![
            ChatMessage {
                role: ChatRole::System,
                content: "sys".into(),
            },
            ChatMessage {
                role: ChatRole::User,
                content: "usr".into(),
            },
        ];
        assert_eq!(flatten_messages(&msgs), "sys\n\nusr");
    }

    #[test]
    fn constructor_rejects_wrong_provider() {
        let cfg = LlmModelConfig {
            provider: LlmProvider::OpenAI,
            model: "m".into(),
            endpoint: "http://localhost:11434".into(),
            api_key: None,
            max_tokens: None,
            temperature: None,
            timeout_secs: None,
            batch: false,
            max_context_tokens: None,
            dimensions: None,
        };
        assert!(OllamaService::new(cfg).is_err());
    }
}
