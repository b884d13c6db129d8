//! Scenario: processor transaction discipline and repository state machine
//! against live Postgres. Requires CORTEX_DATABASE_URL.
//!
//! Run: cargo test -p cortex-testkit --features pg-tests

use std::sync::Arc;

use async_trait::async_trait;
use cortex_ingest::{AppError, DocumentProcessor, ProcessDocument, UploadService};
use cortex_schemas::DocumentStatus;
use cortex_services::{Embedder, FileStore, MemoryIndex, MockEmbedder, ServiceError};
use cortex_testkit::memory_queue;
use uuid::Uuid;

const MAX_RETRIES: u32 = 3;
const DIM: usize = 64;

struct Fixture {
    pool: sqlx::PgPool,
    index: Arc<MemoryIndex>,
    store: FileStore,
    _dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let pool = cortex_db::testkit_db_pool().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    Fixture {
        pool,
        index: Arc::new(MemoryIndex::new()),
        store: FileStore::new(dir.path()),
        _dir: dir,
    }
}

impl Fixture {
    fn processor(&self, embedder: Arc<dyn Embedder>) -> DocumentProcessor {
        DocumentProcessor::new(
            self.pool.clone(),
            embedder,
            Arc::clone(&self.index) as Arc<dyn cortex_services::VectorIndex>,
            self.store.clone(),
            100,
            10,
            MAX_RETRIES,
        )
    }

    async fn pending_document(&self) -> Uuid {
        let mut tx = self.pool.begin().await.unwrap();
        let doc = cortex_db::create_document(
            &mut tx,
            &format!("https://example.com/doc/{}", Uuid::new_v4()),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        doc.id
    }

    async fn status_of(&self, id: Uuid) -> DocumentStatus {
        cortex_db::document_by_id(&self.pool, id)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

/// Embedder that always fails, for the failure path.
struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    fn dim(&self) -> usize {
        DIM
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ServiceError> {
        Err(ServiceError::Embedder("unavailable".to_string()))
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Err(ServiceError::Embedder("unavailable".to_string()))
    }
}

#[tokio::test]
async fn happy_path_reaches_done_with_indexed_chunks_and_no_file() {
    let fx = fixture().await;
    let (queue, _broker) = memory_queue();
    let upload = UploadService::new(fx.pool.clone(), queue, fx.store.clone(), 1000);

    let id = fx.pending_document().await;
    let doc = upload
        .upload(id, "notes.txt", "hello world, this is enough text to chunk".as_bytes())
        .await
        .unwrap();
    let file_path = {
        let row = cortex_db::document_by_id(&fx.pool, doc.id)
            .await
            .unwrap()
            .unwrap();
        row.file_path.expect("file attached")
    };

    let processor = fx.processor(Arc::new(MockEmbedder::new(DIM)));
    processor.process(id).await.unwrap();

    let row = cortex_db::document_by_id(&fx.pool, id).await.unwrap().unwrap();
    assert_eq!(row.status, DocumentStatus::Done);
    assert!(row.file_path.is_none(), "file_path cleared on success");
    assert!(fx.index.points_for(id) >= 1, "chunks indexed");
    assert!(
        !std::path::Path::new(&file_path).exists(),
        "file deleted from disk"
    );
}

#[tokio::test]
async fn reprocessing_a_done_document_is_a_conflict() {
    let fx = fixture().await;
    let id = fx.pending_document().await;

    let processor = fx.processor(Arc::new(MockEmbedder::new(DIM)));
    processor.process(id).await.unwrap(); // no file: empty pipeline, DONE

    match processor.process(id).await {
        Err(AppError::ProcessingConflict { status, .. }) => {
            assert_eq!(status, DocumentStatus::Done)
        }
        other => panic!("expected ProcessingConflict, got {other:?}"),
    }
    assert_eq!(fx.status_of(id).await, DocumentStatus::Done);
}

#[tokio::test]
async fn missing_document_is_not_found() {
    let fx = fixture().await;
    let processor = fx.processor(Arc::new(MockEmbedder::new(DIM)));

    match processor.process(Uuid::new_v4()).await {
        Err(AppError::Domain(cortex_db::RepoError::NotFound(_))) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn pipeline_failure_marks_failed_and_cleans_the_file() {
    let fx = fixture().await;
    let (queue, _broker) = memory_queue();
    let upload = UploadService::new(fx.pool.clone(), queue, fx.store.clone(), 1000);

    let id = fx.pending_document().await;
    upload.upload(id, "doc.txt", b"some content").await.unwrap();
    let file_path = cortex_db::document_by_id(&fx.pool, id)
        .await
        .unwrap()
        .unwrap()
        .file_path
        .unwrap();

    let processor = fx.processor(Arc::new(BrokenEmbedder));
    assert!(processor.process(id).await.is_err());

    let row = cortex_db::document_by_id(&fx.pool, id).await.unwrap().unwrap();
    assert_eq!(row.status, DocumentStatus::Failed);
    assert!(row.file_path.is_none());
    assert!(!std::path::Path::new(&file_path).exists());
    assert_eq!(fx.index.points_for(id), 0, "nothing reached the index");
}

#[tokio::test]
async fn upload_conflicts_with_processing_and_done_documents() {
    let fx = fixture().await;
    let (queue, _broker) = memory_queue();
    let upload = UploadService::new(fx.pool.clone(), queue, fx.store.clone(), 1000);

    let id = fx.pending_document().await;
    let mut tx = fx.pool.begin().await.unwrap();
    cortex_db::update_status(&mut tx, id, DocumentStatus::Processing, MAX_RETRIES)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    match upload.upload(id, "late.txt", b"too late").await {
        Err(AppError::ProcessingConflict { status, .. }) => {
            assert_eq!(status, DocumentStatus::Processing)
        }
        other => panic!("expected ProcessingConflict, got {other:?}"),
    }
}

#[tokio::test]
async fn illegal_transitions_are_rejected_and_leave_state_unchanged() {
    let fx = fixture().await;
    let id = fx.pending_document().await;

    // PENDING→DONE
    let mut tx = fx.pool.begin().await.unwrap();
    assert!(
        cortex_db::update_status(&mut tx, id, DocumentStatus::Done, MAX_RETRIES)
            .await
            .is_err()
    );
    tx.rollback().await.unwrap();
    assert_eq!(fx.status_of(id).await, DocumentStatus::Pending);

    // Walk to DONE, then try to leave it.
    let mut tx = fx.pool.begin().await.unwrap();
    cortex_db::update_status(&mut tx, id, DocumentStatus::Processing, MAX_RETRIES)
        .await
        .unwrap();
    cortex_db::update_status(&mut tx, id, DocumentStatus::Done, MAX_RETRIES)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    for target in [
        DocumentStatus::Processing,
        DocumentStatus::Pending,
        DocumentStatus::Failed,
    ] {
        let mut tx = fx.pool.begin().await.unwrap();
        assert!(
            cortex_db::update_status(&mut tx, id, target, MAX_RETRIES)
                .await
                .is_err(),
            "DONE must be terminal"
        );
        tx.rollback().await.unwrap();
    }
    assert_eq!(fx.status_of(id).await, DocumentStatus::Done);
}

#[tokio::test]
async fn retry_document_increments_until_the_budget_is_spent() {
    let fx = fixture().await;
    let id = fx.pending_document().await;

    for expected in 1..=MAX_RETRIES {
        let mut tx = fx.pool.begin().await.unwrap();
        cortex_db::update_status(&mut tx, id, DocumentStatus::Failed, MAX_RETRIES)
            .await
            .unwrap();
        let row = cortex_db::retry_document(&mut tx, id, MAX_RETRIES)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(row.retry_count as u32, expected);
        assert_eq!(row.status, DocumentStatus::Pending);
    }

    let mut tx = fx.pool.begin().await.unwrap();
    cortex_db::update_status(&mut tx, id, DocumentStatus::Failed, MAX_RETRIES)
        .await
        .unwrap();
    match cortex_db::retry_document(&mut tx, id, MAX_RETRIES).await {
        Err(cortex_db::RepoError::MaxRetriesExceeded { retry_count, .. }) => {
            assert_eq!(retry_count, MAX_RETRIES)
        }
        other => panic!("expected MaxRetriesExceeded, got {other:?}"),
    }
    tx.rollback().await.unwrap();
}
