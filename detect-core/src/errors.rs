use thiserror::Error;

/// Errors produced by the pure detection algorithms.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DetectError {
    /// `find` was called for an element never added to the structure.
    ///
    /// Callers use this to catch stale vector-store points referring to
    /// PRs that no longer exist.
    #[error("element not found in union-find: {0}")]
    ElementNotFound(String),
}
