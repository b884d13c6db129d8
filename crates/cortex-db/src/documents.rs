//! Documents repository: CRUD plus the sole arbiter of legal status
//! transitions.
//!
//! Mutating operations take `&mut PgConnection` so the caller owns the
//! transaction boundary; read-for-update acquires a row-level lock held to
//! transaction end. Concurrent workers contending for the same document are
//! serialized by that lock — the loser observes PROCESSING (or a terminal
//! state) and aborts.

use chrono::{DateTime, Utc};
use cortex_schemas::DocumentStatus;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors the repository may return.
#[derive(Debug)]
pub enum RepoError {
    /// No document row for the given id.
    NotFound(Uuid),
    /// The requested status edge is not part of the state machine.
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },
    /// A retry was requested but the budget is spent.
    MaxRetriesExceeded { document_id: Uuid, retry_count: u32 },
    /// Unique-index violation on `source`.
    DuplicateSource(String),
    /// Underlying Postgres failure.
    Store(sqlx::Error),
}

impl std::fmt::Display for RepoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepoError::NotFound(id) => write!(f, "document {id} not found"),
            RepoError::InvalidTransition { from, to } => {
                write!(f, "cannot transition document from {from} to {to}")
            }
            RepoError::MaxRetriesExceeded {
                document_id,
                retry_count,
            } => {
                write!(
                    f,
                    "document {document_id} exceeded max retries ({retry_count})"
                )
            }
            RepoError::DuplicateSource(source) => {
                write!(f, "document with source {source:?} already exists")
            }
            RepoError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for RepoError {}

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        RepoError::Store(e)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505")
                || db_err.constraint() == Some("uq_documents_source")
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Row type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: Uuid,
    pub source: String,
    pub status: DocumentStatus,
    pub retry_count: i32,
    pub file_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn row_to_document(row: &sqlx::postgres::PgRow) -> Result<DocumentRow, RepoError> {
    let status_raw: String = row.try_get("status")?;
    let status = DocumentStatus::parse(&status_raw).ok_or_else(|| {
        RepoError::Store(sqlx::Error::Decode(
            format!("unknown document status {status_raw:?}").into(),
        ))
    })?;

    Ok(DocumentRow {
        id: row.try_get("id")?,
        source: row.try_get("source")?,
        status,
        retry_count: row.try_get("retry_count")?,
        file_path: row.try_get("file_path")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Validate a status edge against the legal transition set.
///
/// Legal edges: PENDING→PROCESSING, PROCESSING→DONE, PROCESSING→FAILED,
/// PENDING→FAILED (enqueue-failure path), FAILED→PENDING (retry). The retry
/// budget guard is applied by the callers that take the FAILED→PENDING edge;
/// this function only answers whether the edge exists.
pub fn check_transition(from: DocumentStatus, to: DocumentStatus) -> Result<(), RepoError> {
    use DocumentStatus::*;

    let legal = matches!(
        (from, to),
        (Pending, Processing) | (Processing, Done) | (Processing, Failed) | (Pending, Failed)
            | (Failed, Pending)
    );

    if legal {
        Ok(())
    } else {
        Err(RepoError::InvalidTransition { from, to })
    }
}

// ---------------------------------------------------------------------------
// Repository operations
// ---------------------------------------------------------------------------

/// Insert a new PENDING document. Server-assigned id, `retry_count = 0`.
///
/// Must run inside the caller's transaction; a unique violation on `source`
/// maps to [`RepoError::DuplicateSource`] so the caller can roll back and
/// replay idempotently.
pub async fn create_document(
    conn: &mut PgConnection,
    source: &str,
) -> Result<DocumentRow, RepoError> {
    let id = Uuid::new_v4();

    let res = sqlx::query(
        r#"
        insert into documents (id, source, status, retry_count)
        values ($1, $2, 'PENDING', 0)
        returning id, source, status, retry_count, file_path, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(source)
    .fetch_one(&mut *conn)
    .await;

    match res {
        Ok(row) => row_to_document(&row),
        Err(e) if is_unique_violation(&e) => Err(RepoError::DuplicateSource(source.to_string())),
        Err(e) => Err(RepoError::Store(e)),
    }
}

/// Plain read; `None` when absent.
pub async fn document_by_id(pool: &PgPool, id: Uuid) -> Result<Option<DocumentRow>, RepoError> {
    let row = sqlx::query(
        r#"
        select id, source, status, retry_count, file_path, created_at, updated_at
        from documents
        where id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_document).transpose()
}

/// Read with an exclusive row lock held to the end of the caller's
/// transaction.
pub async fn document_by_id_for_update(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<DocumentRow>, RepoError> {
    let row = sqlx::query(
        r#"
        select id, source, status, retry_count, file_path, created_at, updated_at
        from documents
        where id = $1
        for update
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(row_to_document).transpose()
}

/// Read by the unique source key; used for idempotent ingest replay.
pub async fn document_by_source(
    pool: &PgPool,
    source: &str,
) -> Result<Option<DocumentRow>, RepoError> {
    let row = sqlx::query(
        r#"
        select id, source, status, retry_count, file_path, created_at, updated_at
        from documents
        where source = $1
        "#,
    )
    .bind(source)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_document).transpose()
}

/// Lock the row, validate the edge, write the new status.
///
/// FAILED→PENDING is additionally guarded by the retry budget; the count
/// itself is incremented only by [`retry_document`]. PROCESSING→FAILED and
/// PENDING→FAILED leave `retry_count` unchanged.
pub async fn update_status(
    conn: &mut PgConnection,
    id: Uuid,
    target: DocumentStatus,
    max_retries: u32,
) -> Result<DocumentRow, RepoError> {
    let doc = document_by_id_for_update(&mut *conn, id)
        .await?
        .ok_or(RepoError::NotFound(id))?;

    check_transition(doc.status, target)?;

    if doc.status == DocumentStatus::Failed
        && target == DocumentStatus::Pending
        && doc.retry_count as u32 >= max_retries
    {
        return Err(RepoError::MaxRetriesExceeded {
            document_id: id,
            retry_count: doc.retry_count as u32,
        });
    }

    let row = sqlx::query(
        r#"
        update documents
           set status = $2,
               updated_at = now()
         where id = $1
        returning id, source, status, retry_count, file_path, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(target.as_str())
    .fetch_one(&mut *conn)
    .await?;

    row_to_document(&row)
}

/// FAILED→PENDING with `retry_count` incremented, guarded by the budget.
pub async fn retry_document(
    conn: &mut PgConnection,
    id: Uuid,
    max_retries: u32,
) -> Result<DocumentRow, RepoError> {
    let doc = document_by_id_for_update(&mut *conn, id)
        .await?
        .ok_or(RepoError::NotFound(id))?;

    if doc.status != DocumentStatus::Failed {
        return Err(RepoError::InvalidTransition {
            from: doc.status,
            to: DocumentStatus::Pending,
        });
    }

    if doc.retry_count as u32 >= max_retries {
        return Err(RepoError::MaxRetriesExceeded {
            document_id: id,
            retry_count: doc.retry_count as u32,
        });
    }

    let row = sqlx::query(
        r#"
        update documents
           set status = 'PENDING',
               retry_count = retry_count + 1,
               updated_at = now()
         where id = $1
        returning id, source, status, retry_count, file_path, created_at, updated_at
        "#,
    )
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;

    row_to_document(&row)
}

/// Metadata mutation; no state-machine effect.
pub async fn set_file_path(
    conn: &mut PgConnection,
    id: Uuid,
    file_path: &str,
) -> Result<DocumentRow, RepoError> {
    let row = sqlx::query(
        r#"
        update documents
           set file_path = $2,
               updated_at = now()
         where id = $1
        returning id, source, status, retry_count, file_path, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(file_path)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(RepoError::NotFound(id))?;

    row_to_document(&row)
}

/// Clear the upload reference after processing reaches a terminal state.
pub async fn clear_file_path(conn: &mut PgConnection, id: Uuid) -> Result<DocumentRow, RepoError> {
    let row = sqlx::query(
        r#"
        update documents
           set file_path = null,
               updated_at = now()
         where id = $1
        returning id, source, status, retry_count, file_path, created_at, updated_at
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(RepoError::NotFound(id))?;

    row_to_document(&row)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
