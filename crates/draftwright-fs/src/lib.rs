//! Filesystem store and commit backend for draftwright documents.
//!
//! Each document lives in its own directory:
//! - `meta.yml`: uid, name, timestamps, revision
//! - `document.json`: the document itself, replaced atomically on commit
//! - `history.ndjson`: append-only commit records

pub mod config;
pub mod error;
pub mod workspace;

pub use config::{ModelSettings, WorkspaceConfig};
pub use error::{FsError, Result};
pub use workspace::Workspace;
