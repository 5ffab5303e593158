//! draftwright-model: language model access and the edit session pipeline.
//!
//! - `ModelClient`: one request in, one raw response envelope out
//! - `OpenAiCompatClient`: `/v1/chat/completions` over reqwest
//! - `RetryingClient`: per-attempt timeout and fixed-count, fixed-backoff retry
//! - `EditSession`: structure, path selection, edit request, parse, apply

pub mod openai;
pub mod ports;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod session;

pub use openai::OpenAiCompatClient;
pub use ports::{ModelClient, ModelError, ModelRequest, ToolDefinition};
pub use retry::{RetryPolicy, RetryingClient};
pub use session::{DocumentSource, EditSession, PipelineError, Proposal, SourceError};
