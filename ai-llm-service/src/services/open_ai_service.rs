//! OpenAI-compatible service for chat completions and embeddings.
//!
//! Endpoints are derived from `LlmModelConfig::endpoint`:
//! - POST {endpoint}/v1/chat/completions — chat completion (non-streaming)
//! - POST {endpoint}/v1/embeddings       — embeddings retrieval (multi-input)
//! - /v1/files + /v1/batches             — async batch protocol (see `batch`)
//!
//! Constructor validation:
//! - `cfg.provider` must be `LlmProvider::OpenAI`
//! - `cfg.api_key` must be present
//! - `cfg.endpoint` must start with http:// or https://
//!
//! Errors are normalized via the unified types in `error_handler`.

use std::time::{Duration, Instant};

use reqwest::header;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{
    batch::{BatchClient, BatchLine, BatchOptions},
    chat::{ChatMessage, ChatResponse},
    config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider},
    error_handler::{
        AiLlmError, HttpError, Provider, ProviderError, ProviderErrorKind, Result, TokenUsage,
        make_snippet,
    },
};

/// Thin client for an OpenAI-compatible API.
///
/// Constructed from a complete [`LlmModelConfig`]. Internally keeps a
/// preconfigured `reqwest::Client` (timeout and default headers) that is
/// shared with the batch sub-client.
#[derive(Debug)]
pub struct OpenAiService {
    client: reqwest::Client,
    cfg: LlmModelConfig,
    base: String,
    url_chat: String,
    url_embeddings: String,
}

impl OpenAiService {
    /// Creates a new [`OpenAiService`] from the given config.
    ///
    /// # Errors
    /// - [`ProviderErrorKind::InvalidProvider`] if `cfg.provider` is not OpenAI
    /// - [`ProviderErrorKind::MissingApiKey`] if `cfg.api_key` is `None`
    /// - [`ProviderErrorKind::InvalidEndpoint`] if `cfg.endpoint` is invalid
    /// - [`AiLlmError::HttpTransport`] if the HTTP client cannot be built
    pub fn new(cfg: LlmModelConfig) -> Result<Self> {
        if cfg.provider != LlmProvider::OpenAI {
            return Err(
                ProviderError::new(Provider::OpenAI, ProviderErrorKind::InvalidProvider).into(),
            );
        }

        let api_key = cfg.api_key.clone().ok_or_else(|| {
            ProviderError::new(Provider::OpenAI, ProviderErrorKind::MissingApiKey)
        })?;

        let endpoint = cfg.endpoint.trim();
        if endpoint.is_empty()
            || !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            return Err(ProviderError::new(
                Provider::OpenAI,
                ProviderErrorKind::InvalidEndpoint(cfg.endpoint.clone()),
            )
            .into());
        }

        let timeout = cfg
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(120));

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e| {
                ProviderError::new(
                    Provider::OpenAI,
                    ProviderErrorKind::Decode(format!("invalid API key header: {e}")),
                )
            })?,
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        let base = endpoint.trim_end_matches('/').to_string();
        let url_chat = format!("{}/v1/chat/completions", base);
        let url_embeddings = format!("{}/v1/embeddings", base);

        info!(
            provider = ?cfg.provider,
            model = %cfg.model,
            endpoint = %cfg.endpoint,
            batch = cfg.batch,
            "OpenAiService initialized"
        );

        Ok(Self {
            client,
            cfg,
            base,
            url_chat,
            url_embeddings,
        })
    }

    /// Whether the async batch protocol is enabled for this config.
    pub fn supports_batch(&self) -> bool {
        self.cfg.batch
    }

    /// The configuration this service was built from.
    pub fn config(&self) -> &LlmModelConfig {
        &self.cfg
    }

    /// Performs a non-streaming chat completion request.
    ///
    /// # Errors
    /// - [`ProviderErrorKind::HttpStatus`] for non-2xx responses
    /// - [`AiLlmError::HttpTransport`] for client/network failures
    /// - [`ProviderErrorKind::Decode`] if the JSON cannot be parsed
    /// - [`ProviderErrorKind::EmptyChoices`] if no choices are returned
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        let started = Instant::now();
        let body = ChatCompletionRequest::from_cfg(&self.cfg, messages);

        debug!(
            model = %self.cfg.model,
            messages = messages.len(),
            "POST {}", self.url_chat
        );

        let resp = self.client.post(&self.url_chat).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(self.status_error(resp, &self.url_chat, started).await);
        }

        let out: ChatCompletionResponse = resp.json().await.map_err(|e| {
            ProviderError::new(
                Provider::OpenAI,
                ProviderErrorKind::Decode(format!(
                    "serde error: {e}; expected `choices[0].message.content`"
                )),
            )
        })?;

        let response = parse_chat_completion(out)?;

        info!(
            model = %self.cfg.model,
            latency_ms = started.elapsed().as_millis() as u64,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "chat completion completed"
        );
        Ok(response)
    }

    /// Retrieves embeddings for a pre-chunked list of inputs.
    ///
    /// The caller (the `embeddings` dispatch layer) is responsible for
    /// sanitising and chunking; this method posts one request.
    pub async fn embed(&self, inputs: &[String]) -> Result<(Vec<Vec<f32>>, TokenUsage)> {
        let started = Instant::now();
        let body = EmbeddingsRequest {
            model: &self.cfg.model,
            input: inputs,
        };

        debug!(
            model = %self.cfg.model,
            inputs = inputs.len(),
            "POST {}", self.url_embeddings
        );

        let resp = self
            .client
            .post(&self.url_embeddings)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(self.status_error(resp, &self.url_embeddings, started).await);
        }

        let out: EmbeddingsResponse = resp.json().await.map_err(|e| {
            ProviderError::new(
                Provider::OpenAI,
                ProviderErrorKind::Decode(format!("serde error: {e}; expected `data[*].embedding`")),
            )
        })?;

        if out.data.len() != inputs.len() {
            return Err(ProviderError::new(
                Provider::OpenAI,
                ProviderErrorKind::Decode(format!(
                    "embedding count mismatch: sent {}, got {}",
                    inputs.len(),
                    out.data.len()
                )),
            )
            .into());
        }

        // Providers may return data out of order; index is authoritative.
        let mut data = out.data;
        data.sort_by_key(|d| d.index);
        let usage = out
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: 0,
            })
            .unwrap_or_default();

        info!(
            model = %self.cfg.model,
            latency_ms = started.elapsed().as_millis() as u64,
            vectors = data.len(),
            "embeddings completed"
        );
        Ok((data.into_iter().map(|d| d.embedding).collect(), usage))
    }

    /// Submits chat requests through the batch protocol.
    ///
    /// Returns `(custom_id, per-item result)` pairs; item failures do not
    /// fail the batch.
    pub async fn chat_batch(
        &self,
        requests: Vec<(String, Vec<ChatMessage>)>,
        opts: BatchOptions,
    ) -> Result<Vec<(String, std::result::Result<ChatResponse, String>)>> {
        if !self.cfg.batch {
            return Err(ProviderError::new(
                Provider::OpenAI,
                ProviderErrorKind::BatchUnsupported,
            )
            .into());
        }

        let lines = requests
            .into_iter()
            .map(|(custom_id, messages)| {
                let body = serde_json::to_value(ChatCompletionRequest::from_cfg(
                    &self.cfg, &messages,
                ))
                .map_err(|e| {
                    ProviderError::new(Provider::OpenAI, ProviderErrorKind::Decode(e.to_string()))
                })?;
                Ok(BatchLine {
                    custom_id,
                    method: "POST",
                    url: "/v1/chat/completions",
                    body,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let items = self.batch_client().run("/v1/chat/completions", lines, opts).await?;
        Ok(items
            .into_iter()
            .map(|item| {
                let parsed = item.result.and_then(|body| {
                    serde_json::from_value::<ChatCompletionResponse>(body)
                        .map_err(|e| format!("malformed chat body: {e}"))
                        .and_then(|out| {
                            parse_chat_completion(out).map_err(|e| e.to_string())
                        })
                });
                (item.custom_id, parsed)
            })
            .collect())
    }

    /// Submits embedding requests through the batch protocol.
    ///
    /// Each request is one pre-chunked input list; results come back as the
    /// vectors per chunk, in input order.
    pub async fn embed_batch(
        &self,
        requests: Vec<(String, Vec<String>)>,
        opts: BatchOptions,
    ) -> Result<Vec<(String, std::result::Result<(Vec<Vec<f32>>, TokenUsage), String>)>> {
        if !self.cfg.batch {
            return Err(ProviderError::new(
                Provider::OpenAI,
                ProviderErrorKind::BatchUnsupported,
            )
            .into());
        }

        let lines = requests
            .into_iter()
            .map(|(custom_id, inputs)| BatchLine {
                custom_id,
                method: "POST",
                url: "/v1/embeddings",
                body: serde_json::json!({ "model": self.cfg.model, "input": inputs }),
            })
            .collect();

        let items = self.batch_client().run("/v1/embeddings", lines, opts).await?;
        Ok(items
            .into_iter()
            .map(|item| {
                let parsed = item.result.and_then(|body| {
                    serde_json::from_value::<EmbeddingsResponse>(body)
                        .map_err(|e| format!("malformed embeddings body: {e}"))
                        .map(|out| {
                            let mut data = out.data;
                            data.sort_by_key(|d| d.index);
                            let usage = out
                                .usage
                                .map(|u| TokenUsage {
                                    input_tokens: u.prompt_tokens,
                                    output_tokens: 0,
                                })
                                .unwrap_or_default();
                            (
                                data.into_iter().map(|d| d.embedding).collect::<Vec<_>>(),
                                usage,
                            )
                        })
                });
                (item.custom_id, parsed)
            })
            .collect())
    }

    fn batch_client(&self) -> BatchClient {
        BatchClient::new(self.client.clone(), self.base.clone())
    }

    async fn status_error(
        &self,
        resp: reqwest::Response,
        url: &str,
        started: Instant,
    ) -> AiLlmError {
        let status = resp.status();
        let snippet = make_snippet(&resp.text().await.unwrap_or_default());
        error!(
            %status,
            url,
            %snippet,
            model = %self.cfg.model,
            latency_ms = started.elapsed().as_millis() as u64,
            "OpenAI endpoint returned non-success status"
        );
        ProviderError::new(
            Provider::OpenAI,
            ProviderErrorKind::HttpStatus(HttpError {
                status,
                url: url.to_string(),
                snippet,
            }),
        )
        .into()
    }
}

fn parse_chat_completion(out: ChatCompletionResponse) -> Result<ChatResponse> {
    let content = out
        .choices
        .into_iter()
        .find_map(|c| c.message.content)
        .ok_or_else(|| ProviderError::new(Provider::OpenAI, ProviderErrorKind::EmptyChoices))?;

    let usage = out
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(ChatResponse { content, usage })
}

/* ----------------------------- wire shapes ----------------------------- */

/// Minimal request body for `/v1/chat/completions` (non-streaming).
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

impl<'a> ChatCompletionRequest<'a> {
    fn from_cfg(cfg: &'a LlmModelConfig, messages: &'a [ChatMessage]) -> Self {
        Self {
            model: &cfg.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
}

#[derive(Debug, Deserialize)]
struct ChatMessageOut {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_completion_parsing_extracts_content_and_usage() {
        let out: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "hi"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 4}
        }))
        .unwrap();
        let resp = parse_chat_completion(out).unwrap();
        assert_eq!(resp.content, "hi");
        assert_eq!(resp.usage.input_tokens, 10);
        assert_eq!(resp.usage.output_tokens, 4);
    }

    #[test]
    fn empty_choices_is_an_error() {
        let out: ChatCompletionResponse =
            serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(parse_chat_completion(out).is_err());
    }

    #[test]
    fn constructor_rejects_missing_key() {
        let cfg = LlmModelConfig {
            provider: LlmProvider::OpenAI,
            model: "m".into(),
            endpoint: "https://api.example.com".into(),
            api_key: None,
            max_tokens: None,
            temperature: None,
            timeout_secs: None,
            batch: false,
            max_context_tokens: None,
            dimensions: None,
        };
        assert!(OpenAiService::new(cfg).is_err());
    }

    #[test]
    fn constructor_rejects_bad_endpoint() {
        let cfg = LlmModelConfig {
            provider: LlmProvider::OpenAI,
            model: "m".into(),
            endpoint: "ftp://nope".into(),
            api_key: Some("sk-test".into()),
            max_tokens: None,
            temperature: None,
            timeout_secs: None,
            batch: false,
            max_context_tokens: None,
            dimensions: None,
        };
        assert!(OpenAiService::new(cfg).is_err());
    }
}
