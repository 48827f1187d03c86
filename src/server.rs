//! HTTP API for uploads, questions, and usage stats.
//!
//! Authentication happens upstream. A gateway validates the caller's token
//! and forwards the identity in two headers, which this server trusts:
//!
//! - `X-User-Id`: positive integer user id (required on every route but `/health`)
//! - `X-User-Role`: `admin` or `user` (defaults to `user`)
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload?filename=NAME` | Raw `.pdf`/`.docx` bytes → indexed document |
//! | `POST` | `/ask` | `{"query": "..."}` → `{"answer": "..."}` |
//! | `GET`  | `/documents` | Caller's documents, newest first |
//! | `GET`  | `/stats/me` | Caller's usage counters |
//! | `GET`  | `/admin/stats` | Totals and per-user counters (admin only) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `forbidden` (403),
//! `timeout` (408), `unsupported_format` (415), `extraction_failed` (422),
//! `internal` (500), `upstream_error` (502), `service_unavailable` (503).
//!
//! Upload and ask run under `server.request_timeout_secs`. When the deadline
//! passes the pipeline future is dropped, which abandons outstanding external
//! calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequestParts, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::{Config, ServerConfig};
use crate::error::RagError;
use crate::models::{Document, SystemStats, UsageStats};
use crate::services::Services;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    services: Services,
    request_timeout: Duration,
}

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::from_config(config).await?;
    let app = router(services, &config.server);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "docqa server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router around already-constructed services.
pub fn router(services: Services, server: &ServerConfig) -> Router {
    let state = Arc::new(AppState {
        services,
        request_timeout: Duration::from_secs(server.request_timeout_secs),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/upload", post(handle_upload))
        .route("/ask", post(handle_ask))
        .route("/documents", get(handle_documents))
        .route("/stats/me", get(handle_my_stats))
        .route("/admin/stats", get(handle_admin_stats))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(server.max_upload_bytes))
        .layer(cors)
        .with_state(state)
}

// ============ Caller identity ============

/// Identity forwarded by the authenticating gateway.
#[derive(Debug, Clone, Copy)]
struct Caller {
    user_id: i64,
    is_admin: bool,
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .ok_or_else(|| unauthorized("missing X-User-Id header"))?
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .ok_or_else(|| unauthorized("X-User-Id must be a positive integer"))?;

        let is_admin = parts
            .headers
            .get("x-user-role")
            .and_then(|v| v.to_str().ok())
            .map(|r| r.trim().eq_ignore_ascii_case("admin"))
            .unwrap_or(false);

        Ok(Caller { user_id, is_admin })
    }
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        AppError {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
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

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

fn forbidden(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::FORBIDDEN, "forbidden", message)
}

fn timeout_error(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::REQUEST_TIMEOUT, "timeout", message)
}

/// Map a pipeline error to a response. Upstream detail is logged, not returned.
impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        match &err {
            RagError::InvalidInput(msg) => bad_request(msg.clone()),
            RagError::UnsupportedFormat(_) => AppError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_format",
                err.to_string(),
            ),
            RagError::Extraction(_) => AppError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "extraction_failed",
                "could not extract text from the uploaded file",
            ),
            RagError::Transient { stage, .. } => {
                warn!(stage = stage.as_str(), error = %err, "request failed after retries");
                AppError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service_unavailable",
                    "A required service is temporarily unavailable. Please try again later.",
                )
            }
            RagError::Upstream { stage, .. } => {
                error!(stage = stage.as_str(), error = %err, "upstream service error");
                AppError::new(
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    format!("the {} service returned an error", stage),
                )
            }
            RagError::Configuration(_) | RagError::Storage(_) => {
                error!(error = %err, "internal error");
                AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal server error",
                )
            }
        }
    }
}

/// Run a pipeline call under the request deadline.
async fn with_deadline<T>(
    limit: Duration,
    fut: impl Future<Output = crate::error::Result<T>>,
) -> Result<T, AppError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => Err(timeout_error(format!(
            "request did not complete within {}s",
            limit.as_secs()
        ))),
    }
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

// ============ POST /upload ============

#[derive(Deserialize)]
struct UploadParams {
    filename: Option<String>,
}

/// Handler for `POST /upload`.
///
/// The body is the raw file. Responds `201` with the indexed document.
async fn handle_upload(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let filename = params
        .filename
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| bad_request("filename query parameter is required"))?;
    if body.is_empty() {
        return Err(bad_request("request body is empty"));
    }

    let report = with_deadline(
        state.request_timeout,
        state
            .services
            .ingestion
            .ingest_file(caller.user_id, &filename, body.to_vec()),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(report.document)))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    query: String,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
}

async fn handle_ask(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let answer = with_deadline(
        state.request_timeout,
        state.services.answers.answer(&req.query, caller.user_id),
    )
    .await?;

    Ok(Json(AskResponse { answer }))
}

// ============ GET /documents ============

#[derive(Serialize)]
struct DocumentList {
    documents: Vec<Document>,
}

async fn handle_documents(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<DocumentList>, AppError> {
    let documents = state.services.documents.list_documents(caller.user_id).await?;
    Ok(Json(DocumentList { documents }))
}

// ============ GET /stats/me, /admin/stats ============

async fn handle_my_stats(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<UsageStats>, AppError> {
    Ok(Json(state.services.usage.get_user_stats(caller.user_id).await?))
}

/// Totals plus one row per user with counters, ordered by user id.
#[derive(Serialize)]
struct AdminStats {
    #[serde(flatten)]
    totals: SystemStats,
    user_stats: Vec<UsageStats>,
}

async fn handle_admin_stats(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<AdminStats>, AppError> {
    if !caller.is_admin {
        return Err(forbidden("admin role required"));
    }
    let usage = &state.services.usage;
    Ok(Json(AdminStats {
        totals: usage.get_system_stats().await?,
        user_stats: usage.list_user_stats().await?,
    }))
}
