//! Application layer: ingest, upload, processing and search orchestration.
//!
//! Services here own the transaction boundaries. The HTTP façade and the
//! worker stay thin: they translate [`AppError`] tags into status codes or
//! retry decisions and never touch SQL themselves.

use std::fmt;

use cortex_db::RepoError;
use cortex_queue::QueueError;
use cortex_schemas::DocumentStatus;
use cortex_services::ServiceError;
use uuid::Uuid;

pub mod ingest;
pub mod process;
pub mod search;
pub mod upload;

pub use ingest::IngestService;
pub use process::{DocumentProcessor, ProcessDocument};
pub use search::SearchService;
pub use upload::UploadService;

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Application-level error, tagged for the HTTP status mapping.
#[derive(Debug)]
pub enum AppError {
    /// Request payload failed validation.
    Validation(String),
    /// Domain error from the repository (not found, illegal edge, ...).
    Domain(RepoError),
    /// The document is PROCESSING or DONE and cannot be re-scheduled.
    ProcessingConflict {
        document_id: Uuid,
        status: DocumentStatus,
    },
    /// Backpressure: MAIN is at capacity; clients should retry with backoff.
    QueueFull { current: u64, limit: u64 },
    /// Broker failure.
    Queue(QueueError),
    /// External collaborator failure (embedder, vector index, llm, file I/O).
    Service(ServiceError),
    /// Infrastructure failure after compensation (e.g. publish failed and the
    /// document was marked FAILED).
    Infra(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "validation error: {msg}"),
            AppError::Domain(e) => write!(f, "{e}"),
            AppError::ProcessingConflict {
                document_id,
                status,
            } => write!(
                f,
                "document {document_id} is already in state {status} and cannot be re-processed"
            ),
            AppError::QueueFull { current, limit } => {
                write!(f, "queue is full ({current}/{limit}), retry later")
            }
            AppError::Queue(e) => write!(f, "{e}"),
            AppError::Service(e) => write!(f, "{e}"),
            AppError::Infra(msg) => write!(f, "infrastructure error: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<RepoError> for AppError {
    fn from(e: RepoError) -> Self {
        AppError::Domain(e)
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        AppError::Queue(e)
    }
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        AppError::Service(e)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Domain(RepoError::Store(e))
    }
}
