//! Thin Axum surface over `Engine`: `process_question`, `refresh_schema`,
//! `paginate_result` (spec §6). `State<Arc<AppState>>` extractor, `Json` in/out,
//! `ApiError` implementing `IntoResponse`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::EngineError;
use crate::engine::cache::ResultPage;
use crate::engine::session::SessionContext;
use crate::engine::types::Answer;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/workspaces/:workspace_id/questions", post(ask_question))
        .route("/api/workspaces/:workspace_id/schema/refresh", post(refresh_schema))
        .route("/api/workspaces/:workspace_id/results/:handle", get(paginate_result))
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

/// Wraps `EngineError` for the HTTP boundary. Every variant maps to a status code; the
/// body carries the redacted message (§7: callers never see raw secret-shaped text).
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::DependencyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::UnrecoverableSchemaError(_) => StatusCode::BAD_GATEWAY,
            EngineError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.redacted_message() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct AskQuestionRequest {
    pub session_id: String,
    pub question: String,
    /// Overrides the configured default deadline, in seconds, when present (§6).
    pub deadline_secs: Option<u64>,
    #[serde(default = "default_memory_enabled")]
    pub memory_enabled: bool,
}

fn default_memory_enabled() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct AskQuestionResponse {
    #[serde(flatten)]
    pub answer: Answer,
}

/// `POST /api/workspaces/:workspace_id/questions` — the one user-facing entry point
/// (spec §6's `process_question`).
pub async fn ask_question(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    Json(req): Json<AskQuestionRequest>,
) -> ApiResult<Json<AskQuestionResponse>> {
    let deadline = req
        .deadline_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.config.engine.default_deadline());
    let session = SessionContext::new(req.session_id, req.memory_enabled && state.config.engine.memory_enabled);

    let answer = state.engine.process_question(&workspace_id, &session, &req.question, deadline).await?;
    Ok(Json(AskQuestionResponse { answer }))
}

/// `POST /api/workspaces/:workspace_id/schema/refresh` (spec §6's `refresh_schema`).
pub async fn refresh_schema(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.refresh_schema(&workspace_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PaginationParams {
    #[serde(default)]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    50
}

/// `GET /api/workspaces/:workspace_id/results/:handle` (spec §6's `paginate_result`).
/// A missing or expired handle is a client-visible 404, not an `EngineError` — the
/// pagination cache's TTL expiry is an expected, non-exceptional outcome.
pub async fn paginate_result(
    State(state): State<Arc<AppState>>,
    Path((workspace_id, handle)): Path<(String, Uuid)>,
    Query(params): Query<PaginationParams>,
) -> Response {
    match state.engine.paginate_result(&workspace_id, handle, params.page, params.page_size) {
        Some(page) => Json(ResultPageResponse::from(page)).into_response(),
        None => (StatusCode::NOT_FOUND, "result handle not found or expired").into_response(),
    }
}

#[derive(Debug, Serialize)]
struct ResultPageResponse {
    columns: Vec<String>,
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
    page: usize,
    page_size: usize,
    total_rows: usize,
}

impl From<ResultPage> for ResultPageResponse {
    fn from(p: ResultPage) -> Self {
        Self { columns: p.columns, rows: p.rows, page: p.page, page_size: p.page_size, total_rows: p.total_rows }
    }
}
