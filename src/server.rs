//! HTTP API.
//!
//! Exposes ingestion, direct queries, routed queries, and agent sessions
//! as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `GET`    | `/collections` | List collections |
//! | `POST`   | `/collections/{name}/files` | Upload files, replacing the collection |
//! | `DELETE` | `/collections/{name}` | Remove a collection |
//! | `POST`   | `/query` | Query one engine of a collection directly |
//! | `POST`   | `/route` | Let the router pick summary or vector retrieval |
//! | `POST`   | `/sessions` | Open an agent session |
//! | `POST`   | `/sessions/{id}/files` | Attach files for the agent to ingest |
//! | `POST`   | `/sessions/{id}/chat` | Run one agent turn |
//! | `DELETE` | `/sessions/{id}` | Close a session |
//!
//! File bodies carry base64 content:
//!
//! ```json
//! { "files": [ { "name": "paper.pdf", "content_base64": "JVBERi0xLjQK..." } ] }
//! ```
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unknown_collection", "message": "query failed: unknown collection 'docs'" } }
//! ```
//!
//! | Error | Status | Code |
//! |-------|--------|------|
//! | ingest / invalid request | 400 | `bad_request` |
//! | empty index | 400 | `empty_index` |
//! | unknown collection or session | 404 | `unknown_collection` / `not_found` |
//! | tool call limit | 429 | `tool_limit_exceeded` |
//! | cancelled | 409 | `cancelled` |
//! | provider timeout | 504 | `timeout` |
//! | provider / vector store failure | 502 | `upstream_error` |
//! | chat turn panicked | 500 | `internal` |

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use docroute_core::agent::{CancelToken, ChatReply};
use docroute_core::models::CollectionInfo;
use docroute_core::router::{RetrievalTool, RouteResponse};
use docroute_core::{Answer, Document, Operation, RagError};

use crate::app::App;
use crate::extract::{content_type_for, to_text_document};
use crate::ingest::{ingest_files, NamedBlob};

/// Build the API router over `app`.
pub fn router(app: App) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/collections", get(handle_list_collections))
        .route("/collections/{name}", delete(handle_remove_collection))
        .route("/collections/{name}/files", post(handle_upload))
        .route("/query", post(handle_query))
        .route("/route", post(handle_route))
        .route("/sessions", post(handle_open_session))
        .route("/sessions/{id}", delete(handle_close_session))
        .route("/sessions/{id}/files", post(handle_attach))
        .route("/sessions/{id}/chat", post(handle_chat))
        .layer(cors)
        .with_state(app)
}

/// Serve the API on `[server].bind` until the process is terminated.
pub async fn run_server(app: App) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "docroute server listening");
    axum::serve(listener, router(app)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"unknown_collection"`).
    code: String,
    message: String,
}

/// Error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(code = %self.code, message = %self.message, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let message = err.to_string();
        match &err {
            RagError::Ingest { .. } => bad_request(message),
            RagError::Invalid { reason, .. } if reason.starts_with("unknown session") => not_found(message),
            RagError::Invalid { .. } => bad_request(message),
            RagError::EmptyIndex { .. } => AppError::new(StatusCode::BAD_REQUEST, "empty_index", message),
            RagError::UnknownCollection { .. } => {
                AppError::new(StatusCode::NOT_FOUND, "unknown_collection", message)
            }
            RagError::ToolLimitExceeded { .. } => {
                AppError::new(StatusCode::TOO_MANY_REQUESTS, "tool_limit_exceeded", message)
            }
            RagError::Cancelled { .. } => AppError::new(StatusCode::CONFLICT, "cancelled", message),
            RagError::ProviderTimeout { .. } => AppError::new(StatusCode::GATEWAY_TIMEOUT, "timeout", message),
            RagError::Provider { .. } | RagError::Store { .. } => {
                AppError::new(StatusCode::BAD_GATEWAY, "upstream_error", message)
            }
        }
    }
}

// ============ Request bodies ============

#[derive(Deserialize)]
struct FileUpload {
    name: String,
    content_base64: String,
}

#[derive(Deserialize)]
struct FilesRequest {
    files: Vec<FileUpload>,
}

fn decode_files(files: Vec<FileUpload>) -> Result<Vec<NamedBlob>, AppError> {
    files
        .into_iter()
        .map(|f| {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(f.content_base64.trim())
                .map_err(|e| bad_request(format!("{}: invalid base64: {}", f.name, e)))?;
            Ok(NamedBlob::new(f.name, bytes))
        })
        .collect()
}

fn non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(bad_request(format!("{} must not be empty", field)));
    }
    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Collections ============

#[derive(Serialize)]
struct CollectionListResponse {
    collections: Vec<CollectionInfo>,
}

async fn handle_list_collections(State(app): State<App>) -> Json<CollectionListResponse> {
    Json(CollectionListResponse {
        collections: app.catalog.list().await,
    })
}

/// `POST /collections/{name}/files`: replace the collection with the uploaded set.
async fn handle_upload(
    State(app): State<App>,
    Path(name): Path<String>,
    Json(req): Json<FilesRequest>,
) -> Result<Json<CollectionInfo>, AppError> {
    let blobs = decode_files(req.files)?;
    let name = ingest_files(&app.catalog, &name, blobs).await?;
    let info = app
        .catalog
        .get(&name)
        .await
        .ok_or_else(|| not_found(format!("collection '{}' was removed during ingestion", name)))?;
    Ok(Json(info))
}

async fn handle_remove_collection(State(app): State<App>, Path(name): Path<String>) -> Result<StatusCode, AppError> {
    if app.catalog.remove(&name).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::new(
            StatusCode::NOT_FOUND,
            "unknown_collection",
            format!("unknown collection '{}'", name),
        ))
    }
}

// ============ POST /query ============

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum EngineKind {
    Vector,
    Summary,
}

#[derive(Deserialize)]
struct QueryRequest {
    collection: String,
    query: String,
    #[serde(default)]
    engine: Option<EngineKind>,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    rerank_top_n: Option<usize>,
}

/// Query one engine directly, bypassing the router. Defaults to vector retrieval.
async fn handle_query(State(app): State<App>, Json(req): Json<QueryRequest>) -> Result<Json<Answer>, AppError> {
    non_empty("query", &req.query)?;
    let top_k = req.top_k.unwrap_or(app.config.retrieval.top_k);
    if top_k == 0 {
        return Err(bad_request("top_k must be >= 1"));
    }
    let rerank_top_n = req.rerank_top_n.or_else(|| app.rerank_top_n()).map(|n| n.min(top_k));

    let (tool, op) = match req.engine.unwrap_or(EngineKind::Vector) {
        EngineKind::Vector => (RetrievalTool::vector(&req.collection, top_k, rerank_top_n), Operation::Query),
        EngineKind::Summary => (RetrievalTool::summary(&req.collection), Operation::Summarize),
    };
    let answer = tool.run(&app.catalog, &app.engine, &req.query, op).await?;
    Ok(Json(answer))
}

// ============ POST /route ============

#[derive(Deserialize)]
struct RouteRequest {
    collection: String,
    query: String,
}

async fn handle_route(State(app): State<App>, Json(req): Json<RouteRequest>) -> Result<Json<RouteResponse>, AppError> {
    non_empty("query", &req.query)?;
    let tools = app.router_tools(&req.collection);
    let response = app.router.route(&req.query, &tools).await?;
    Ok(Json(response))
}

// ============ Sessions ============

#[derive(Serialize)]
struct SessionResponse {
    session_id: String,
}

async fn handle_open_session(State(app): State<App>) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let session_id = app.agent.open_session().await?;
    Ok((StatusCode::CREATED, Json(SessionResponse { session_id })))
}

async fn handle_close_session(State(app): State<App>, Path(id): Path<String>) -> Result<StatusCode, AppError> {
    if app.agent.close_session(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("unknown session '{}'", id)))
    }
}

#[derive(Serialize)]
struct AttachResponse {
    attached: Vec<String>,
}

/// Attach files to a session. Binary formats are converted to text here,
/// so an unreadable file fails the upload rather than the later tool call.
async fn handle_attach(
    State(app): State<App>,
    Path(id): Path<String>,
    Json(req): Json<FilesRequest>,
) -> Result<Json<AttachResponse>, AppError> {
    if req.files.is_empty() {
        return Err(bad_request("files must not be empty"));
    }
    let blobs = decode_files(req.files)?;
    let mut attached = Vec::with_capacity(blobs.len());
    for blob in blobs {
        let content_type = content_type_for(&blob.name);
        let document = to_text_document(Document::new(blob.name.clone(), blob.bytes, content_type))
            .map_err(|e| bad_request(format!("{}: {}", blob.name, e)))?;
        app.agent.attach(&id, document).await?;
        attached.push(blob.name);
    }
    Ok(Json(AttachResponse { attached }))
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

async fn handle_chat(
    State(app): State<App>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, AppError> {
    non_empty("message", &req.message)?;
    let cancel = CancelToken::new();
    let _on_disconnect = CancelOnDrop(cancel.clone());
    let agent = app.agent.clone();
    let turn = tokio::spawn(async move { agent.chat(&id, &req.message, &cancel).await });
    let reply = turn
        .await
        .map_err(|e| AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", format!("chat turn failed: {}", e)))??;
    Ok(Json(reply))
}

/// Cancels the turn when the handler future is dropped before it completes,
/// e.g. when the client disconnects. The spawned turn then stops at its
/// next cancellation check with the session left consistent.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropping_handler_guard_cancels_turn() {
        let cancel = CancelToken::new();
        let guard = CancelOnDrop(cancel.clone());
        assert!(!cancel.is_cancelled());
        drop(guard);
        assert!(cancel.is_cancelled());
    }
}
