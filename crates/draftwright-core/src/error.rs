//! Error types for draftwright-core.

use thiserror::Error;

/// Result type alias for draftwright-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by the explicit parsing and writing APIs.
///
/// The pipeline entry points (`get`, `to_stable_update_path`,
/// `extract_structure`, `parse_response`, `apply`) never return these; they
/// degrade to `None` or a fallback value instead.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Path text could not be tokenized.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A filter segment was not of the form `[?(@.key=='value')]`.
    #[error("invalid predicate '{predicate}' in path '{path}'")]
    InvalidPredicate { path: String, predicate: String },

    /// Writing through a path hit a scalar or an unknown list element.
    #[error("cannot write '{path}': {reason}")]
    Unwritable { path: String, reason: String },

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
