//! File attachment: persist bytes, bind them to the document, schedule
//! processing.

use cortex_db::{document_by_id_for_update, set_file_path, DocumentRow, RepoError};
use cortex_queue::DocumentQueue;
use cortex_schemas::DocumentStatus;
use cortex_services::FileStore;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::AppError;

pub struct UploadService {
    pool: PgPool,
    queue: DocumentQueue,
    file_store: FileStore,
    queue_max_length: u64,
}

impl UploadService {
    pub fn new(
        pool: PgPool,
        queue: DocumentQueue,
        file_store: FileStore,
        queue_max_length: u64,
    ) -> Self {
        Self {
            pool,
            queue,
            file_store,
            queue_max_length,
        }
    }

    /// Attach uploaded bytes to an existing document and enqueue it.
    ///
    /// The file write happens before and outside the transaction; the row
    /// lock then guards the status check, the metadata update and the
    /// enqueue together. Here the enqueue deliberately sits inside the
    /// transaction: a committed `file_path` with no job is a worse invariant
    /// violation than a queued job whose commit failed — the broker write is
    /// idempotent and a worker seeing a missing document quarantines it.
    pub async fn upload(
        &self,
        document_id: Uuid,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<DocumentRow, AppError> {
        let current = self.queue.main_len().await?;
        if current >= self.queue_max_length {
            return Err(AppError::QueueFull {
                current,
                limit: self.queue_max_length,
            });
        }

        let file_path = self
            .file_store
            .save(document_id, original_name, bytes)
            .await?;
        let file_path = file_path.to_string_lossy().into_owned();

        let mut tx = self.pool.begin().await?;

        let doc = document_by_id_for_update(&mut *tx, document_id)
            .await?
            .ok_or(RepoError::NotFound(document_id))?;

        if matches!(
            doc.status,
            DocumentStatus::Processing | DocumentStatus::Done
        ) {
            tx.rollback().await.ok();
            return Err(AppError::ProcessingConflict {
                document_id,
                status: doc.status,
            });
        }

        let doc = set_file_path(&mut *tx, document_id, &file_path).await?;
        self.queue.enqueue(document_id).await?;
        tx.commit().await?;

        info!(%document_id, file_path, "uploaded file and enqueued document");
        Ok(doc)
    }
}
