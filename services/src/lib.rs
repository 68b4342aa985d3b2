//! Shared helpers used across the workspace.
//!
//! Kept deliberately small: identifier mapping for vector-store points and
//! content fingerprints for change detection.

pub mod fingerprint;
pub mod uuid;

pub use fingerprint::content_fingerprint;
pub use uuid::stable_uuid;
