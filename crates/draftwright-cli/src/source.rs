//! Workspace-backed document source for the edit session.

use draftwright_core::{CommitInfo, CommitRecord, UpdateMap};
use draftwright_fs::Workspace;
use draftwright_model::{DocumentSource, SourceError};
use serde_json::Value;

/// One document in a workspace. Every load reads the file again.
pub struct WorkspaceSource<'w> {
    ws: &'w Workspace,
    uid: String,
}

impl<'w> WorkspaceSource<'w> {
    pub fn new(ws: &'w Workspace, uid: impl Into<String>) -> Self {
        Self { ws, uid: uid.into() }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }
}

impl DocumentSource for WorkspaceSource<'_> {
    fn load(&self) -> Result<Value, SourceError> {
        Ok(self.ws.get_document(&self.uid)?)
    }

    fn commit(&self, updates: &UpdateMap, info: CommitInfo) -> Result<Option<CommitRecord>, SourceError> {
        Ok(self.ws.commit(&self.uid, updates, info)?)
    }
}
