//! HTTP tool server for model integrations.
//!
//! Exposes a local API over a draftwright workspace: read shapes and
//! reduced documents, turn raw model responses into update maps, and commit
//! them. The server never calls a model itself.

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{Method, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use draftwright_core::{
    CommitInfo, CommitRecord, DocumentMeta, Edit, EditBatch, ParseTier, UpdateMap,
    normalize_body, normalize_envelope,
};
use draftwright_fs::{FsError, Workspace};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

struct AppState {
    workspace_path: PathBuf,
}

impl AppState {
    fn workspace(&self) -> Result<Workspace, AppError> {
        Ok(Workspace::open(&self.workspace_path)?)
    }
}

/// Routes over the workspace at `workspace_path`.
pub fn router(workspace_path: &std::path::Path) -> Router {
    let state = Arc::new(AppState {
        workspace_path: workspace_path.to_path_buf(),
    });

    Router::new()
        .route("/health", get(health))
        .route("/documents", get(list_documents).post(import_document))
        .route("/documents/{uid}", get(get_document))
        .route("/documents/{uid}/structure", get(structure))
        .route("/documents/{uid}/select", post(select))
        .route("/documents/{uid}/resolve", post(resolve))
        .route("/documents/{uid}/propose", post(propose))
        .route("/documents/{uid}/commit", post(commit))
        .route("/documents/{uid}/history", get(history))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([CONTENT_TYPE]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the tool server.
///
/// # Errors
/// Returns error if binding fails or the server encounters an error.
pub async fn serve(workspace_path: &std::path::Path, host: &str, port: u16) -> Result<()> {
    let app = router(workspace_path);

    let addr = format!("{host}:{port}");
    info!(address = %addr, "Starting tool server");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Request/Response types ---

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    documents: Vec<DocumentMeta>,
    count: usize,
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    name: String,
    document: Value,
}

#[derive(Debug, Deserialize)]
struct GetQuery {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SelectRequest {
    #[serde(default)]
    paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    path: String,
}

#[derive(Debug, Serialize)]
struct ResolveResponse {
    path: String,
    stable_path: String,
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ProposeRequest {
    /// Raw response body as text, or a decoded provider envelope.
    response: Value,
}

#[derive(Debug, Serialize)]
struct ProposeResponse {
    batch: EditBatch,
    updates: UpdateMap,
    coerced: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CommitRequest {
    /// Precomputed update map.
    #[serde(default)]
    updates: UpdateMap,
    /// Edits to apply against the current document when `updates` is empty.
    #[serde(default, alias = "edits")]
    changes: Vec<Edit>,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    actor: Option<String>,
    #[serde(default)]
    tier: Option<ParseTier>,
}

#[derive(Debug, Serialize)]
struct CommitResponse {
    committed: bool,
    commit: Option<CommitRecord>,
    updates: UpdateMap,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    since: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Handlers ---

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_documents(State(state): State<Arc<AppState>>) -> Result<Json<ListResponse>, AppError> {
    let documents = state.workspace()?.list_documents()?;
    let count = documents.len();
    Ok(Json(ListResponse { documents, count }))
}

async fn import_document(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImportRequest>,
) -> Result<(StatusCode, Json<DocumentMeta>), AppError> {
    let meta = state.workspace()?.import_document(req.name, &req.document)?;
    Ok((StatusCode::CREATED, Json(meta)))
}

async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
    Query(query): Query<GetQuery>,
) -> Result<Json<Value>, AppError> {
    let ws = state.workspace()?;
    let document = ws.get_document(&uid)?;

    match query.path {
        None => Ok(Json(document)),
        Some(path) => ws
            .config()
            .resolver()
            .get(&document, &path)
            .cloned()
            .map(Json)
            .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, format!("path not found: {path}"))),
    }
}

async fn structure(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> Result<Json<Value>, AppError> {
    let ws = state.workspace()?;
    let document = ws.get_document(&uid)?;
    Ok(Json(ws.config().extractor().extract(&document).to_value()))
}

async fn select(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
    Json(req): Json<SelectRequest>,
) -> Result<Json<Value>, AppError> {
    let ws = state.workspace()?;
    let document = ws.get_document(&uid)?;
    Ok(Json(ws.config().selector().filter_by_paths(&document, &req.paths)))
}

async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, AppError> {
    let ws = state.workspace()?;
    let document = ws.get_document(&uid)?;
    let resolver = ws.config().resolver();

    Ok(Json(ResolveResponse {
        stable_path: resolver.to_stable_update_path(&document, &req.path),
        value: resolver.get(&document, &req.path).cloned(),
        path: req.path,
    }))
}

async fn propose(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
    Json(req): Json<ProposeRequest>,
) -> Result<Json<ProposeResponse>, AppError> {
    let ws = state.workspace()?;
    let config = ws.config();

    let response = match &req.response {
        Value::String(body) => normalize_body(body),
        envelope => normalize_envelope(envelope),
    };
    let batch = config.parser().parse(&response);

    let document = ws.get_document(&uid)?;
    let report = config.applicator().apply_report(&document, &batch);

    info!(uid = %uid, tier = %batch.tier, updates = report.updates.len(), "Proposed update map");

    Ok(Json(ProposeResponse {
        batch,
        updates: report.updates,
        coerced: report.coerced,
    }))
}

async fn commit(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
    Json(req): Json<CommitRequest>,
) -> Result<Json<CommitResponse>, AppError> {
    let ws = state.workspace()?;

    let updates = if req.updates.is_empty() && !req.changes.is_empty() {
        let document = ws.get_document(&uid)?;
        let batch = EditBatch::manual(req.changes, req.reason.clone());
        ws.config().applicator().apply(&document, &batch)
    } else {
        req.updates
    };

    let mut info = CommitInfo::new(req.reason);
    if let Some(actor) = req.actor {
        info = info.with_actor(actor);
    }
    if let Some(tier) = req.tier {
        info = info.with_tier(tier);
    }

    let commit = ws.commit(&uid, &updates, info)?;

    Ok(Json(CommitResponse {
        committed: commit.is_some(),
        commit,
        updates,
    }))
}

async fn history(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<CommitRecord>>, AppError> {
    Ok(Json(state.workspace()?.read_history(&uid, query.since)?))
}

// --- Error handling ---

struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    fn status(status: StatusCode, message: String) -> Self {
        Self {
            status,
            error: anyhow::anyhow!(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(ErrorResponse {
            error: self.error.to_string(),
        });

        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let error = err.into();
        let status = match error.downcast_ref::<FsError>() {
            Some(FsError::DocumentNotFound(_) | FsError::WorkspaceNotFound(_)) => StatusCode::NOT_FOUND,
            Some(FsError::InvalidUid(_) | FsError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            Some(FsError::DocumentExists(_)) => StatusCode::CONFLICT,
            Some(FsError::Core(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, error }
    }
}
