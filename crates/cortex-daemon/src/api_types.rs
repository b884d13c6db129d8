//! Request and response types for all cortex-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use cortex_db::DocumentRow;
use cortex_schemas::{DocumentStatus, SearchResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// POST /api/v1/documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub source: String,
}

/// Accepted-document body shared by the ingest and upload endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub status: DocumentStatus,
    pub source: String,
}

impl From<DocumentRow> for DocumentResponse {
    fn from(row: DocumentRow) -> Self {
        Self {
            id: row.id,
            status: row.status,
            source: row.source,
        }
    }
}

// ---------------------------------------------------------------------------
// POST /api/v1/search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_search_limit() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub answer: String,
    pub results: Vec<SearchResult>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body for client-visible (4xx) failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// Body for unexpected failures: a correlation id and no internal detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalErrorResponse {
    pub detail: String,
    pub error_id: Uuid,
}
