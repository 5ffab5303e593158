//! The full propose pipeline for one request.
//!
//! ```text
//! load -> shape -> [select paths] -> filter -> [propose edits] -> parse -> reload -> apply
//! ```
//!
//! Bracketed steps are model calls. The document is loaded twice: once to
//! build the model's context, and again right before stable paths are
//! resolved, so edits land on the document as it is after the round trip.

use crate::ports::{ModelClient, ModelError, ModelRequest};
use crate::prompt::{SYSTEM_PROMPT, edit_prompt, selection_prompt};
use crate::schema::{propose_tool, select_tool, selected_paths};
use draftwright_core::{
    CommitInfo, CommitRecord, EditBatch, FieldSelector, PatchApplicator, ResponseParser,
    StructureExtractor, UpdateMap, normalize_envelope,
};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Where the live document comes from and where updates go.
pub trait DocumentSource: Send + Sync {
    /// Current document contents.
    ///
    /// # Errors
    /// Returns an error if the document cannot be read.
    fn load(&self) -> Result<Value, SourceError>;

    /// Apply `updates` as one transaction. `None` means nothing was written.
    ///
    /// # Errors
    /// Returns an error if the update could not be applied.
    fn commit(&self, updates: &UpdateMap, info: CommitInfo) -> Result<Option<CommitRecord>, SourceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to load document: {0}")]
    Load(#[source] SourceError),

    #[error(transparent)]
    Model(#[from] ModelError),

    /// Edits were proposed but the live document could not be re-read.
    #[error("failed to reload document before applying edits: {source}")]
    Reload {
        batch: Box<EditBatch>,
        #[source]
        source: SourceError,
    },

    #[error("failed to commit update map: {source}")]
    Commit {
        batch: Box<EditBatch>,
        #[source]
        source: SourceError,
    },
}

impl PipelineError {
    /// The proposed batch, if the pipeline got that far.
    #[must_use]
    pub fn batch(&self) -> Option<&EditBatch> {
        match self {
            Self::Reload { batch, .. } | Self::Commit { batch, .. } => Some(batch),
            Self::Load(_) | Self::Model(_) => None,
        }
    }
}

/// Result of a propose run, ready for review.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proposal {
    pub batch: EditBatch,
    pub updates: UpdateMap,
    /// Paths the model was shown; `None` when it saw the unfiltered document.
    pub selected: Option<Vec<String>>,
    /// Keys where `add` started from an empty list.
    pub coerced: Vec<String>,
}

impl Proposal {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.updates.is_empty()
    }
}

pub struct EditSession<C> {
    client: C,
    extractor: StructureExtractor,
    selector: FieldSelector,
    parser: ResponseParser,
    applicator: PatchApplicator,
    select_timeout: Duration,
}

impl<C: ModelClient> EditSession<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            extractor: StructureExtractor::default(),
            selector: FieldSelector::default(),
            parser: ResponseParser::default(),
            applicator: PatchApplicator::default(),
            select_timeout: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: StructureExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    #[must_use]
    pub fn with_selector(mut self, selector: FieldSelector) -> Self {
        self.selector = selector;
        self
    }

    #[must_use]
    pub fn with_parser(mut self, parser: ResponseParser) -> Self {
        self.parser = parser;
        self
    }

    #[must_use]
    pub fn with_applicator(mut self, applicator: PatchApplicator) -> Self {
        self.applicator = applicator;
        self
    }

    /// Limit for the path selection round; on expiry the model gets the
    /// whole document instead.
    #[must_use]
    pub const fn with_select_timeout(mut self, timeout: Duration) -> Self {
        self.select_timeout = timeout;
        self
    }

    /// Ask the model for edits and fold them into an update map.
    ///
    /// # Errors
    /// Returns `PipelineError::Load` if the document cannot be read,
    /// `PipelineError::Model` if a model call fails, and
    /// `PipelineError::Reload` (carrying the parsed batch) if the document
    /// cannot be re-read after the model answered.
    pub async fn propose(&self, instruction: &str, source: &dyn DocumentSource) -> Result<Proposal, PipelineError> {
        let (context, selected) = {
            let document = source.load().map_err(PipelineError::Load)?;
            let shape = self.extractor.extract(&document).to_value();
            match self.select_paths(instruction, &shape).await? {
                Some(paths) => {
                    let reduced = self.selector.filter_by_paths(&document, &paths);
                    (reduced, Some(paths))
                }
                None => (document, None),
            }
        };

        let request = ModelRequest::new(edit_prompt(instruction, &context))
            .with_system(SYSTEM_PROMPT)
            .with_tool(propose_tool());
        drop(context);

        let envelope = self.client.complete(&request).await?;
        let batch = self.parser.parse(&normalize_envelope(&envelope));
        info!(tier = %batch.tier, edits = batch.len(), "Parsed model response");

        let live = match source.load() {
            Ok(live) => live,
            Err(source) => {
                return Err(PipelineError::Reload {
                    batch: Box::new(batch),
                    source,
                });
            }
        };

        let report = self.applicator.apply_report(&live, &batch);
        for key in &report.coerced {
            warn!(path = %key, "add on a non-list target; starting from an empty list");
        }

        Ok(Proposal {
            batch,
            updates: report.updates,
            selected,
            coerced: report.coerced,
        })
    }

    /// Commit an accepted proposal through `source`.
    ///
    /// # Errors
    /// Returns `PipelineError::Commit`, carrying the batch, if the commit fails.
    pub fn commit(
        &self,
        proposal: Proposal,
        source: &dyn DocumentSource,
        actor: Option<&str>,
    ) -> Result<Option<CommitRecord>, PipelineError> {
        let mut info = CommitInfo::new(&proposal.batch.reason).with_tier(proposal.batch.tier);
        if let Some(actor) = actor {
            info = info.with_actor(actor);
        }

        source
            .commit(&proposal.updates, info)
            .map_err(|source| PipelineError::Commit {
                batch: Box::new(proposal.batch),
                source,
            })
    }

    /// Paths the model wants, or `None` to fall back to the full document.
    async fn select_paths(&self, instruction: &str, shape: &Value) -> Result<Option<Vec<String>>, ModelError> {
        let request = ModelRequest::new(selection_prompt(instruction, shape))
            .with_system(SYSTEM_PROMPT)
            .with_tool(select_tool());

        let Ok(outcome) = tokio::time::timeout(self.select_timeout, self.client.complete(&request)).await
        else {
            warn!(timeout = ?self.select_timeout, "Path selection timed out, using the full document");
            return Ok(None);
        };

        let paths = selected_paths(&normalize_envelope(&outcome?)).filter(|paths| !paths.is_empty());
        match &paths {
            Some(paths) => debug!(count = paths.len(), "Model selected paths"),
            None => warn!("No usable path selection, using the full document"),
        }
        Ok(paths)
    }
}
