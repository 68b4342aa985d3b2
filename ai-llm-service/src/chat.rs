//! Chat provider facade (enum dispatch, no async-trait).

use crate::{
    batch::BatchOptions,
    config::{LlmModelConfig, LlmProvider},
    error_handler::{Provider, ProviderError, ProviderErrorKind, Result, TokenUsage},
    services::{ollama_service::OllamaService, open_ai_service::OpenAiService},
    tokens,
};

/// Message role in a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One chat message.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Completed chat call: the text plus provider-reported token usage.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: TokenUsage,
}

/// Concrete chat provider with enum dispatch.
///
/// This type is the main entry point for all chat interactions. Sync `chat`
/// works on every backend; `chat_batch` requires a batch-capable config
/// (check [`ChatProvider::supports_batch`] first).
#[derive(Debug)]
pub enum ChatProvider {
    OpenAi(OpenAiService),
    Ollama(OllamaService),
}

impl ChatProvider {
    /// Constructs a concrete provider from generic configuration.
    pub fn from_config(cfg: LlmModelConfig) -> Result<Self> {
        match cfg.provider {
            LlmProvider::OpenAI => Ok(Self::OpenAi(OpenAiService::new(cfg)?)),
            LlmProvider::Ollama => Ok(Self::Ollama(OllamaService::new(cfg)?)),
        }
    }

    /// Whether the async batch protocol can be used.
    pub fn supports_batch(&self) -> bool {
        match self {
            Self::OpenAi(s) => s.supports_batch(),
            Self::Ollama(_) => false,
        }
    }

    /// Context window for prompt budgeting.
    pub fn max_context_tokens(&self) -> u32 {
        match self {
            Self::OpenAi(s) => s.config().context_tokens(),
            Self::Ollama(s) => s.config().context_tokens(),
        }
    }

    /// Approximate token count for a text.
    pub fn count_tokens(&self, text: &str) -> u32 {
        tokens::count_tokens(text)
    }

    /// Single non-streaming chat completion.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        match self {
            Self::OpenAi(s) => s.chat(messages).await,
            Self::Ollama(s) => s.chat(messages).await,
        }
    }

    /// Batch chat completions; per-item failures stay per-item.
    ///
    /// # Errors
    /// [`ProviderErrorKind::BatchUnsupported`] for non-batch backends.
    pub async fn chat_batch(
        &self,
        requests: Vec<(String, Vec<ChatMessage>)>,
        opts: BatchOptions,
    ) -> Result<Vec<(String, std::result::Result<ChatResponse, String>)>> {
        match self {
            Self::OpenAi(s) => s.chat_batch(requests, opts).await,
            Self::Ollama(_) => Err(ProviderError::new(
                Provider::Ollama,
                ProviderErrorKind::BatchUnsupported,
            )
            .into()),
        }
    }
}
