use thiserror::Error;

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors produced by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A row that must exist does not.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A JSON column failed to (de)serialize.
    #[error("stored json invalid: {0}")]
    Json(#[from] serde_json::Error),

    /// A scan status write violated the state machine.
    #[error("invalid scan transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// A stored enum column held an unknown value.
    #[error("corrupt column value for {column}: {value}")]
    CorruptColumn { column: &'static str, value: String },
}
