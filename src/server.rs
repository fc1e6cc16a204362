//! HTTP JSON API for the integrity engine.
//!
//! Exposes the submission-lifecycle surface consumed by the front-end:
//! document upload, job polling, lifecycle decisions, and grading.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/documents` | Upload a document revision, returns a job handle |
//! | `GET`  | `/jobs/{handle}` | Poll job status/progress/result |
//! | `POST` | `/jobs/{handle}/cancel` | Cancel before matching starts |
//! | `GET`  | `/submissions` | List submissions (optional `?search=`) |
//! | `GET`  | `/submissions/{id}` | Current state + latest result summary |
//! | `POST` | `/submissions/{id}/decision` | submit / submit_anyway / resubmit |
//! | `POST` | `/submissions/{id}/grade` | Lecturer-only, write-once grade |
//! | `POST` | `/submissions/{id}/retry` | Re-run a failed revision's analysis |
//! | `POST` | `/corpus/reload` | Swap in a fresh corpus snapshot |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses carry a machine-readable code:
//!
//! ```json
//! { "error": { "code": "already_graded", "message": "submission already graded" } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use crate::engine::{DecisionAction, Engine, UploadRequest};
use crate::error::EngineError;
use crate::models::{Principal, Role};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

/// Starts the HTTP server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(engine: Arc<Engine>) -> anyhow::Result<()> {
    let bind_addr = engine.config().server.bind.clone();
    let state = AppState { engine };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/documents", post(handle_upload))
        .route("/jobs/{handle}", get(handle_poll_job))
        .route("/jobs/{handle}/cancel", post(handle_cancel_job))
        .route("/submissions", get(handle_list_submissions))
        .route("/submissions/{id}", get(handle_get_submission))
        .route("/submissions/{id}/decision", post(handle_decision))
        .route("/submissions/{id}/grade", post(handle_grade))
        .route("/submissions/{id}/retry", post(handle_retry))
        .route("/corpus/reload", post(handle_corpus_reload))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!("integrity engine listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
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

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let (status, code) = match &err {
            EngineError::UnsupportedFormat(_) => (StatusCode::BAD_REQUEST, "unsupported_format"),
            EngineError::Extraction(_) => (StatusCode::BAD_REQUEST, "extraction_error"),
            EngineError::IndexUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "index_unavailable")
            }
            EngineError::AnalysisTimeout => (StatusCode::GATEWAY_TIMEOUT, "analysis_timeout"),
            EngineError::Canceled => (StatusCode::CONFLICT, "canceled"),
            EngineError::InvalidStateTransition { .. } => {
                (StatusCode::CONFLICT, "invalid_state_transition")
            }
            EngineError::AlreadyGraded => (StatusCode::CONFLICT, "already_graded"),
            EngineError::Unauthorized(_) => (StatusCode::FORBIDDEN, "unauthorized"),
            EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            EngineError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            EngineError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

// ============ POST /documents ============

#[derive(Deserialize)]
struct UploadBody {
    submission_id: Option<Uuid>,
    user_id: Uuid,
    role: Role,
    student: Option<String>,
    assignment_id: Option<Uuid>,
    title: Option<String>,
    format: String,
    content_base64: String,
    #[serde(default)]
    cited: Vec<String>,
}

impl UploadBody {
    fn into_request(self) -> Result<UploadRequest, AppError> {
        let content = base64::engine::general_purpose::STANDARD
            .decode(&self.content_base64)
            .map_err(|e| bad_request(format!("content_base64 is not valid base64: {}", e)))?;
        Ok(UploadRequest {
            submission_id: self.submission_id,
            principal: Principal {
                user_id: self.user_id,
                role: self.role,
            },
            student: self.student,
            assignment_id: self.assignment_id,
            title: self.title,
            format: self.format,
            content,
            cited: self.cited,
        })
    }
}

async fn handle_upload(
    State(state): State<AppState>,
    Json(body): Json<UploadBody>,
) -> Result<impl IntoResponse, AppError> {
    let request = body.into_request()?;
    let receipt = state.engine.upload(request)?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

// ============ GET /jobs/{handle} ============

async fn handle_poll_job(
    State(state): State<AppState>,
    Path(handle): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let view = state.engine.poll_job(handle)?;
    Ok(Json(view))
}

// ============ POST /jobs/{handle}/cancel ============

async fn handle_cancel_job(
    State(state): State<AppState>,
    Path(handle): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.engine.cancel_job(handle)?;
    Ok(Json(serde_json::json!({ "canceled": true })))
}

// ============ GET /submissions ============

#[derive(Deserialize)]
struct ListQuery {
    search: Option<String>,
}

async fn handle_list_submissions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let submissions = state.engine.submissions(query.search.as_deref());
    Json(serde_json::json!({ "submissions": submissions }))
}

// ============ GET /submissions/{id} ============

async fn handle_get_submission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let submission = state.engine.submission(id)?;
    Ok(Json(submission))
}

// ============ POST /submissions/{id}/decision ============

#[derive(Deserialize)]
struct DecisionBody {
    action: DecisionAction,
    user_id: Uuid,
    role: Role,
    // Present only for resubmit.
    format: Option<String>,
    content_base64: Option<String>,
    #[serde(default)]
    cited: Vec<String>,
}

async fn handle_decision(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<DecisionBody>,
) -> Result<impl IntoResponse, AppError> {
    let principal = Principal {
        user_id: body.user_id,
        role: body.role,
    };

    let resubmission = match (body.action, &body.format, &body.content_base64) {
        (DecisionAction::Resubmit, Some(format), Some(content_base64)) => {
            let content = base64::engine::general_purpose::STANDARD
                .decode(content_base64)
                .map_err(|e| bad_request(format!("content_base64 is not valid base64: {}", e)))?;
            Some(UploadRequest {
                submission_id: Some(id),
                principal,
                student: None,
                assignment_id: None,
                title: None,
                format: format.clone(),
                content,
                cited: body.cited,
            })
        }
        (DecisionAction::Resubmit, _, _) => {
            return Err(bad_request(
                "resubmit requires `format` and `content_base64`",
            ));
        }
        _ => None,
    };

    let outcome = state.engine.decide(id, body.action, principal, resubmission)?;
    Ok(Json(outcome))
}

// ============ POST /submissions/{id}/grade ============

#[derive(Deserialize)]
struct GradeBody {
    grade: u8,
    user_id: Uuid,
    role: Role,
}

async fn handle_grade(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<GradeBody>,
) -> Result<impl IntoResponse, AppError> {
    let principal = Principal {
        user_id: body.user_id,
        role: body.role,
    };
    let submission = state.engine.grade(id, principal, body.grade)?;
    Ok(Json(submission))
}

// ============ POST /submissions/{id}/retry ============

#[derive(Deserialize)]
struct RetryBody {
    user_id: Uuid,
    role: Role,
}

async fn handle_retry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RetryBody>,
) -> Result<impl IntoResponse, AppError> {
    let principal = Principal {
        user_id: body.user_id,
        role: body.role,
    };
    let receipt = state.engine.retry(id, principal)?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

// ============ POST /corpus/reload ============

async fn handle_corpus_reload(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let entries = state.engine.reload_corpus()?;
    Ok(Json(serde_json::json!({ "entries": entries })))
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
