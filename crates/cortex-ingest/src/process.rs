//! Pipeline orchestration for a single document.
//!
//! Strict transaction discipline: a short claim transaction, the heavy
//! lifting with no transaction open, then a short finalize (or failure)
//! transaction. A crash between claim and finalize leaves the document
//! PROCESSING and the job in-flight; the visibility-timeout sweeper
//! recovers it.

use std::sync::Arc;

use async_trait::async_trait;
use cortex_db::{clear_file_path, document_by_id_for_update, update_status, RepoError};
use cortex_schemas::{ChunkPayload, DocumentStatus};
use cortex_services::{chunk_text, chunk_point_id, Embedder, FileStore, Point, VectorIndex};
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::AppError;

/// Processing capability the worker loop is written against.
///
/// Object-safe so the loop's ack/retry/DLQ discipline can be exercised with
/// a scripted stand-in.
#[async_trait]
pub trait ProcessDocument: Send + Sync {
    /// Advance one document through claim → chunk → embed → index → finalize.
    async fn process(&self, document_id: Uuid) -> Result<(), AppError>;

    /// Terminal handling once the retry budget is spent: clear and delete
    /// the uploaded file, mark the document FAILED.
    async fn mark_failed(&self, document_id: Uuid) -> Result<(), AppError>;
}

pub struct DocumentProcessor {
    pool: PgPool,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    file_store: FileStore,
    chunk_size: usize,
    chunk_overlap: usize,
    max_retries: u32,
}

impl DocumentProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        file_store: FileStore,
        chunk_size: usize,
        chunk_overlap: usize,
        max_retries: u32,
    ) -> Self {
        Self {
            pool,
            embedder,
            index,
            file_store,
            chunk_size,
            chunk_overlap,
            max_retries,
        }
    }

    /// Claim transaction: lock the row, reject conflicts, move to PROCESSING,
    /// capture the file path.
    async fn claim(&self, document_id: Uuid) -> Result<Option<String>, AppError> {
        let mut tx = self.pool.begin().await?;

        let doc = document_by_id_for_update(&mut *tx, document_id)
            .await?
            .ok_or(RepoError::NotFound(document_id))?;

        if matches!(
            doc.status,
            DocumentStatus::Done | DocumentStatus::Processing
        ) {
            tx.rollback().await.ok();
            return Err(AppError::ProcessingConflict {
                document_id,
                status: doc.status,
            });
        }

        update_status(
            &mut *tx,
            document_id,
            DocumentStatus::Processing,
            self.max_retries,
        )
        .await?;
        tx.commit().await?;

        Ok(doc.file_path)
    }

    /// Heavy lifting, no transaction open: read, chunk, embed, upsert.
    ///
    /// Point ids derive from `(document_id, chunk_index)`, so redelivery of
    /// the same job re-writes the same points.
    async fn run_pipeline(
        &self,
        document_id: Uuid,
        file_path: Option<&str>,
    ) -> Result<(), AppError> {
        let Some(path) = file_path else {
            // Nothing uploaded yet; the upload path enqueues again later.
            return Ok(());
        };

        let content = self.file_store.read_to_string(path).await?;
        let chunks = chunk_text(&content, self.chunk_size, self.chunk_overlap);
        if chunks.is_empty() {
            return Ok(());
        }

        let vectors = self.embedder.embed_batch(&chunks).await?;

        let points = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (text, vector))| Point {
                id: chunk_point_id(document_id, i),
                vector,
                payload: ChunkPayload {
                    document_id,
                    chunk_index: i,
                    text,
                },
            })
            .collect::<Vec<_>>();

        let count = points.len();
        self.index.upsert(points).await?;
        info!(%document_id, chunks = count, "indexed document chunks");
        Ok(())
    }

    async fn finalize(&self, document_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        update_status(&mut *tx, document_id, DocumentStatus::Done, self.max_retries).await?;
        clear_file_path(&mut *tx, document_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_failure(&self, document_id: Uuid) {
        let result = async {
            let mut tx = self.pool.begin().await?;
            update_status(
                &mut *tx,
                document_id,
                DocumentStatus::Failed,
                self.max_retries,
            )
            .await?;
            clear_file_path(&mut *tx, document_id).await?;
            tx.commit().await?;
            Ok::<_, AppError>(())
        }
        .await;

        if let Err(e) = result {
            error!(%document_id, error = %e, "could not mark document FAILED");
        }
    }
}

#[async_trait]
impl ProcessDocument for DocumentProcessor {
    async fn process(&self, document_id: Uuid) -> Result<(), AppError> {
        let file_path = self.claim(document_id).await?;

        match self.run_pipeline(document_id, file_path.as_deref()).await {
            Ok(()) => {
                self.finalize(document_id).await?;
                if let Some(path) = &file_path {
                    self.file_store.delete(path).await;
                }
                info!(%document_id, "processed document");
                Ok(())
            }
            Err(e) => {
                if let Some(path) = &file_path {
                    self.file_store.delete(path).await;
                }
                self.record_failure(document_id).await;
                Err(e)
            }
        }
    }

    async fn mark_failed(&self, document_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let doc = document_by_id_for_update(&mut *tx, document_id)
            .await?
            .ok_or(RepoError::NotFound(document_id))?;
        let file_path = doc.file_path.clone();

        if file_path.is_some() {
            clear_file_path(&mut *tx, document_id).await?;
        }
        if doc.status != DocumentStatus::Failed {
            update_status(
                &mut *tx,
                document_id,
                DocumentStatus::Failed,
                self.max_retries,
            )
            .await?;
        }
        tx.commit().await?;

        if let Some(path) = file_path {
            self.file_store.delete(&path).await;
        }
        Ok(())
    }
}
