use thiserror::Error;

/// Result alias for engine operations.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Unified error for processors and the strategy.
///
/// Processors surface any failure by returning this; the worker loop turns
/// it into a queue retry (`pause`) or a permanent `fail`, mirroring the
/// failure onto the owning scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Store(#[from] data_store::StoreError),

    #[error(transparent)]
    GitHub(#[from] github_client::GitHubError),

    #[error(transparent)]
    Llm(#[from] ai_llm_service::AiLlmError),

    #[error(transparent)]
    Vector(#[from] vector_store::VectorStoreError),

    #[error("bad job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("account configuration invalid: {0}")]
    Config(String),

    #[error("model returned unusable output: {0}")]
    InvalidModelOutput(String),
}
