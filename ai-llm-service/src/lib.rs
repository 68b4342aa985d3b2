//! Shared LLM service: chat and embedding providers behind enum dispatch.
//!
//! Two provider backends are supported:
//! - **OpenAI-compatible** cloud APIs (`/v1/chat/completions`, `/v1/embeddings`,
//!   plus the `/v1/files` + `/v1/batches` async batch protocol);
//! - **Ollama** for local inference (sync only).
//!
//! Enum dispatch is used instead of async-trait or heap objects; callers hold
//! a [`chat::ChatProvider`] or [`embeddings::EmbeddingProvider`] and never see
//! the concrete backend.

pub mod batch;
pub mod chat;
pub mod config;
pub mod embeddings;
pub mod error_handler;
pub mod services;
pub mod tokens;

pub use chat::{ChatMessage, ChatProvider, ChatResponse};
pub use config::{LlmModelConfig, LlmProvider};
pub use embeddings::EmbeddingProvider;
pub use error_handler::{AiLlmError, TokenUsage};
