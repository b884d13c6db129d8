//! Axum router and all HTTP handlers for cortex-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.
//!
//! Error mapping lives in exactly one place ([`error_response`]): domain tags
//! map to 4xx, everything infrastructural collapses to a generic 500 with a
//! correlation id and no internal detail.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cortex_db::RepoError;
use cortex_ingest::AppError;
use tracing::error;
use uuid::Uuid;

use crate::{
    api_types::{
        DocumentResponse, ErrorResponse, IngestRequest, InternalErrorResponse, SearchRequest,
        SearchResponse,
    },
    state::AppState,
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/documents", post(ingest_document))
        .route("/api/v1/documents/:document_id/upload", post(upload_document))
        .route("/api/v1/search", post(search))
        .route("/api/v1/health/live", get(health_live))
        .route("/api/v1/health/ready", get(health_ready))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping (the single status table)
// ---------------------------------------------------------------------------

pub(crate) fn error_response(err: AppError) -> Response {
    let status = match &err {
        AppError::Validation(_) => StatusCode::BAD_REQUEST,
        AppError::Domain(RepoError::NotFound(_)) => StatusCode::NOT_FOUND,
        AppError::Domain(RepoError::InvalidTransition { .. }) => StatusCode::CONFLICT,
        AppError::Domain(RepoError::MaxRetriesExceeded { .. }) => StatusCode::CONFLICT,
        // Duplicate sources are resolved by idempotent replay and should
        // never reach the boundary; treat a leak as a client error.
        AppError::Domain(RepoError::DuplicateSource(_)) => StatusCode::BAD_REQUEST,
        AppError::ProcessingConflict { .. } => StatusCode::CONFLICT,
        AppError::QueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
        AppError::Domain(RepoError::Store(_))
        | AppError::Queue(_)
        | AppError::Service(_)
        | AppError::Infra(_) => {
            let error_id = Uuid::new_v4();
            error!(%error_id, error = %err, "internal error");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(InternalErrorResponse {
                    detail: "Internal Server Error".to_string(),
                    error_id,
                }),
            )
                .into_response();
        }
    };

    (
        status,
        Json(ErrorResponse {
            detail: err.to_string(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /api/v1/documents
// ---------------------------------------------------------------------------

pub(crate) async fn ingest_document(
    State(st): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Response {
    match st.ingest.ingest(&req.source).await {
        Ok(doc) => (StatusCode::ACCEPTED, Json(DocumentResponse::from(doc))).into_response(),
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// POST /api/v1/documents/{id}/upload
// ---------------------------------------------------------------------------

pub(crate) async fn upload_document(
    State(st): State<Arc<AppState>>,
    Path(document_id): Path<String>,
    mut multipart: Multipart,
) -> Response {
    // Validate the id format at the boundary.
    let Ok(document_id) = Uuid::parse_str(&document_id) else {
        return error_response(AppError::Validation(
            "document id must be a UUID".to_string(),
        ));
    };

    let mut file: Option<(String, Vec<u8>)> = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() == Some("file") {
                    let name = field.file_name().unwrap_or("upload").to_string();
                    match field.bytes().await {
                        Ok(bytes) => {
                            file = Some((name, bytes.to_vec()));
                            break;
                        }
                        Err(e) => {
                            return error_response(AppError::Validation(format!(
                                "unreadable multipart field: {e}"
                            )))
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return error_response(AppError::Validation(format!("bad multipart body: {e}")))
            }
        }
    }

    let Some((name, bytes)) = file else {
        return error_response(AppError::Validation(
            "multipart field 'file' is required".to_string(),
        ));
    };

    match st.upload.upload(document_id, &name, &bytes).await {
        Ok(doc) => (StatusCode::ACCEPTED, Json(DocumentResponse::from(doc))).into_response(),
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// POST /api/v1/search
// ---------------------------------------------------------------------------

pub(crate) async fn search(
    State(st): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Response {
    match st.search.search(&req.query, req.limit).await {
        Ok((answer, results)) => {
            (StatusCode::OK, Json(SearchResponse { answer, results })).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// GET /api/v1/health/live
// ---------------------------------------------------------------------------

/// Liveness probe: the process is up. Does not touch dependencies.
pub(crate) async fn health_live() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

// ---------------------------------------------------------------------------
// GET /api/v1/health/ready
// ---------------------------------------------------------------------------

/// Readiness probe: per-dependency status map, 503 when anything is down.
pub(crate) async fn health_ready(State(st): State<Arc<AppState>>) -> Response {
    let mut statuses = BTreeMap::new();
    let mut all_healthy = true;

    match cortex_db::db_status(&st.pool).await {
        Ok(s) if s.ok => {
            statuses.insert("postgres", "ok".to_string());
        }
        Ok(_) => {
            statuses.insert("postgres", "error".to_string());
            all_healthy = false;
        }
        Err(e) => {
            statuses.insert("postgres", format!("error: {e}"));
            all_healthy = false;
        }
    }

    match st.queue.broker().ping().await {
        Ok(()) => {
            statuses.insert("redis", "ok".to_string());
        }
        Err(e) => {
            statuses.insert("redis", format!("error: {e}"));
            all_healthy = false;
        }
    }

    match st.index.ping().await {
        Ok(()) => {
            statuses.insert("vector", "ok".to_string());
        }
        Err(e) => {
            statuses.insert("vector", format!("error: {e}"));
            all_healthy = false;
        }
    }

    let code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(statuses)).into_response()
}
