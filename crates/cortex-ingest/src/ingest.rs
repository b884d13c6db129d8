//! Document ingestion: commit-then-publish with compensation.

use cortex_db::{create_document, document_by_source, update_status, DocumentRow, RepoError};
use cortex_queue::DocumentQueue;
use cortex_schemas::DocumentStatus;
use sqlx::PgPool;
use tracing::{error, info};

use crate::AppError;

pub struct IngestService {
    pool: PgPool,
    queue: DocumentQueue,
    queue_max_length: u64,
    max_retries: u32,
}

impl IngestService {
    pub fn new(pool: PgPool, queue: DocumentQueue, queue_max_length: u64, max_retries: u32) -> Self {
        Self {
            pool,
            queue,
            queue_max_length,
            max_retries,
        }
    }

    /// Accept a source reference and guarantee a queued job for it if and
    /// only if the document was newly created.
    ///
    /// Three-phase discipline:
    /// 1. backpressure check against MAIN,
    /// 2. commit the document row (idempotent replay on duplicate source),
    /// 3. publish after commit; a publish failure is compensated by marking
    ///    the document FAILED in a fresh transaction.
    ///
    /// Collapsing phases 2 and 3 into one transaction would put uncommitted
    /// documents in the queue; keep them split.
    pub async fn ingest(&self, source: &str) -> Result<DocumentRow, AppError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(AppError::Validation("source must be non-empty".to_string()));
        }

        let current = self.queue.main_len().await?;
        if current >= self.queue_max_length {
            return Err(AppError::QueueFull {
                current,
                limit: self.queue_max_length,
            });
        }

        let mut tx = self.pool.begin().await?;
        let doc = match create_document(&mut *tx, source).await {
            Ok(doc) => {
                tx.commit().await?;
                doc
            }
            Err(RepoError::DuplicateSource(_)) => {
                tx.rollback().await?;
                // Idempotent replay: return the canonical row, no new enqueue.
                let existing = document_by_source(&self.pool, source)
                    .await?
                    .ok_or_else(|| {
                        AppError::Infra(format!(
                            "duplicate source {source:?} but no row found on replay"
                        ))
                    })?;
                info!(document_id = %existing.id, source, "returning existing document");
                return Ok(existing);
            }
            Err(e) => {
                tx.rollback().await.ok();
                return Err(e.into());
            }
        };

        // Document is durable from here on.
        if let Err(enqueue_err) = self.queue.enqueue(doc.id).await {
            error!(document_id = %doc.id, error = %enqueue_err, "failed to enqueue document");
            self.compensate_publish_failure(doc.id).await;
            return Err(AppError::Infra(format!(
                "failed to enqueue document: {enqueue_err}"
            )));
        }

        info!(document_id = %doc.id, source, "enqueued document");
        Ok(doc)
    }

    /// Mark the document FAILED in a new transaction after a publish failure.
    /// Must not run inside the original commit transaction.
    async fn compensate_publish_failure(&self, document_id: uuid::Uuid) {
        let result = async {
            let mut tx = self.pool.begin().await?;
            update_status(&mut *tx, document_id, DocumentStatus::Failed, self.max_retries).await?;
            tx.commit().await?;
            Ok::<_, AppError>(())
        }
        .await;

        match result {
            Ok(()) => info!(%document_id, "marked document FAILED after enqueue failure"),
            Err(e) => error!(%document_id, error = %e, "could not mark document FAILED"),
        }
    }
}
