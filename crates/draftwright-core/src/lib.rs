//! draftwright-core: the edit pipeline's pure building blocks.
//!
//! This crate provides:
//! - `PathResolver`: dotted/bracketed addressing with stable list keys
//! - `StructureExtractor`: value-free shape mirrors, cycle safe
//! - `FieldSelector`: reduction of a document to requested paths
//! - `ResponseParser`: tiered extraction of edit batches from model output
//! - `PatchApplicator`: edit batches folded into one update map
//! - `CommitRecord` / `DocumentMeta`: history and storage models
//!
//! Nothing here performs I/O.

pub mod document;
pub mod edit;
pub mod error;
pub mod graph;
pub mod patch;
pub mod path;
pub mod record;
pub mod response;
pub mod select;
pub mod shape;

pub use document::DocumentMeta;
pub use edit::{Edit, EditBatch, Operation, ParseTier};
pub use error::{CoreError, Result};
pub use graph::{DocumentGraph, GraphRef, GraphValue, NodeId};
pub use patch::{PatchApplicator, PatchReport, UpdateMap};
pub use path::{AliasTable, PathExpression, PathOptions, PathResolver, Segment};
pub use record::{CommitInfo, CommitRecord, FieldChange};
pub use response::{
    Dialect, EnvelopeAdapter, HeuristicLabel, ModelResponse, ParserOptions, ResponseParser,
    ToolCall, detect_dialect, embedded_json, normalize_body, normalize_envelope, parse_response,
};
pub use select::{FieldSelector, SelectOptions, TextNormalizer};
pub use shape::{
    CIRCULAR_SENTINEL, DocumentNode, FieldShape, ShapeOptions, StructureExtractor,
    extract_structure,
};
