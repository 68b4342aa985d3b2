//! Service resolution: builds the per-account client set.
//!
//! Every processor resolves its collaborators from the scan's account row,
//! so one worker process can serve tenants with different providers, keys
//! and thresholds.

use std::time::Duration;

use ai_llm_service::{
    ChatProvider, EmbeddingProvider, LlmModelConfig, LlmProvider,
};
use data_store::{Account, EmbeddingSettings, LlmSettings, ScanSettings};
use github_client::GitHubClient;
use rate_limited_http::{RateLimitConfig, RateLimitedClient};
use vector_store::{VectorStore, VectorStoreConfig};

use crate::errors::{ScanError, ScanResult};

/// Clients and thresholds resolved from one account.
pub struct Services {
    pub github: GitHubClient,
    pub chat: ChatProvider,
    pub embedding: EmbeddingProvider,
    pub vectors: VectorStore,
    pub scan: ScanSettings,
}

/// Builds the full service set for an account.
pub fn resolve_services(account: &Account) -> ScanResult<Services> {
    let cfg = &account.config;

    let http = reqwest::Client::builder()
        .user_agent("pr-dedup-backend/0.1")
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| ScanError::Config(format!("http client: {e}")))?;
    let limited = RateLimitedClient::new(http, RateLimitConfig::default());

    let github = GitHubClient::new(
        limited,
        cfg.github.api_base.clone(),
        cfg.github.token.clone(),
    );

    let chat = ChatProvider::from_config(chat_model_config(&cfg.llm)?)?;
    let embedding = EmbeddingProvider::from_config(embedding_model_config(&cfg.embedding)?)?;

    let vectors = VectorStore::new(&VectorStoreConfig {
        url: cfg.vector_store.url.clone(),
        api_key: cfg.vector_store.api_key.clone(),
    })?;

    Ok(Services {
        github,
        chat,
        embedding,
        vectors,
        scan: cfg.scan.clone(),
    })
}

fn provider_kind(raw: &str) -> ScanResult<LlmProvider> {
    match raw {
        "openai" => Ok(LlmProvider::OpenAI),
        "ollama" => Ok(LlmProvider::Ollama),
        other => Err(ScanError::Config(format!("unknown provider '{other}'"))),
    }
}

fn chat_model_config(llm: &LlmSettings) -> ScanResult<LlmModelConfig> {
    Ok(LlmModelConfig {
        provider: provider_kind(&llm.provider)?,
        model: llm.model.clone(),
        endpoint: llm.url.clone(),
        api_key: llm.api_key.clone(),
        max_tokens: None,
        temperature: Some(0.0),
        timeout_secs: Some(120),
        batch: llm.batch,
        max_context_tokens: llm.max_context_tokens,
        dimensions: None,
    })
}

fn embedding_model_config(embedding: &EmbeddingSettings) -> ScanResult<LlmModelConfig> {
    Ok(LlmModelConfig {
        provider: provider_kind(&embedding.provider)?,
        model: embedding.model.clone(),
        endpoint: embedding.url.clone(),
        api_key: embedding.api_key.clone(),
        max_tokens: None,
        temperature: None,
        timeout_secs: Some(120),
        batch: embedding.batch,
        max_context_tokens: None,
        dimensions: Some(embedding.dimensions),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_a_config_error() {
        assert!(provider_kind("openai").is_ok());
        assert!(provider_kind("ollama").is_ok());
        assert!(matches!(
            provider_kind("anthropic"),
            Err(ScanError::Config(_))
        ));
    }
}
