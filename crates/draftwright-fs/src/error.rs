//! Error types for the filesystem store.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("workspace not found at '{0}'")]
    WorkspaceNotFound(PathBuf),

    #[error("workspace already exists at '{0}'")]
    WorkspaceExists(PathBuf),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("document already exists: {0}")]
    DocumentExists(String),

    /// UIDs look like `doc:<slug>`.
    #[error("invalid UID format: {0}")]
    InvalidUid(String),

    /// The name produced an empty slug.
    #[error("invalid document name: '{0}'")]
    InvalidName(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// An update map could not be applied.
    #[error("core error: {0}")]
    Core(#[from] draftwright_core::CoreError),
}
