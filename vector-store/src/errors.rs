use thiserror::Error;

/// Errors produced by the vector-store facade.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// Any failure reported by the Qdrant client.
    #[error("qdrant error: {0}")]
    Qdrant(String),

    /// Payload could not be converted into the store's representation.
    #[error("invalid point payload: {0}")]
    InvalidPayload(String),
}
