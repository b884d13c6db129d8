//! Repository CRUD and state-machine enforcement against live Postgres.
//! Requires CORTEX_DATABASE_URL.
//!
//! Run: cargo test -p cortex-db --features pg-tests

use cortex_db::{
    clear_file_path, create_document, document_by_id, document_by_id_for_update,
    document_by_source, retry_document, set_file_path, update_status, RepoError,
};
use cortex_schemas::DocumentStatus;
use uuid::Uuid;

const MAX_RETRIES: u32 = 3;

fn unique_source() -> String {
    format!("https://example.com/repo/{}", Uuid::new_v4())
}

#[tokio::test]
async fn create_inserts_a_pending_row_with_zero_retries() {
    let pool = cortex_db::testkit_db_pool().await.unwrap();

    let source = unique_source();
    let mut tx = pool.begin().await.unwrap();
    let doc = create_document(&mut tx, &source).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(doc.status, DocumentStatus::Pending);
    assert_eq!(doc.retry_count, 0);
    assert_eq!(doc.source, source);
    assert!(doc.file_path.is_none());

    let by_source = document_by_source(&pool, &source).await.unwrap().unwrap();
    assert_eq!(by_source.id, doc.id);
}

#[tokio::test]
async fn duplicate_source_is_a_unique_violation() {
    let pool = cortex_db::testkit_db_pool().await.unwrap();
    let source = unique_source();

    let mut tx = pool.begin().await.unwrap();
    create_document(&mut tx, &source).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    match create_document(&mut tx, &source).await {
        Err(RepoError::DuplicateSource(s)) => assert_eq!(s, source),
        other => panic!("expected DuplicateSource, got {other:?}"),
    }
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn absent_documents_read_as_none_and_update_as_not_found() {
    let pool = cortex_db::testkit_db_pool().await.unwrap();
    let ghost = Uuid::new_v4();

    assert!(document_by_id(&pool, ghost).await.unwrap().is_none());

    let mut tx = pool.begin().await.unwrap();
    assert!(document_by_id_for_update(&mut tx, ghost)
        .await
        .unwrap()
        .is_none());
    match update_status(&mut tx, ghost, DocumentStatus::Processing, MAX_RETRIES).await {
        Err(RepoError::NotFound(id)) => assert_eq!(id, ghost),
        other => panic!("expected NotFound, got {other:?}"),
    }
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn the_happy_path_walks_pending_processing_done() {
    let pool = cortex_db::testkit_db_pool().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    let doc = create_document(&mut tx, &unique_source()).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    let doc2 = update_status(&mut tx, doc.id, DocumentStatus::Processing, MAX_RETRIES)
        .await
        .unwrap();
    assert_eq!(doc2.status, DocumentStatus::Processing);
    let doc3 = update_status(&mut tx, doc.id, DocumentStatus::Done, MAX_RETRIES)
        .await
        .unwrap();
    assert_eq!(doc3.status, DocumentStatus::Done);
    assert!(doc3.updated_at >= doc.updated_at);
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn failure_edges_leave_the_retry_count_alone() {
    let pool = cortex_db::testkit_db_pool().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    let doc = create_document(&mut tx, &unique_source()).await.unwrap();
    // PENDING→FAILED (enqueue-failure path)
    let failed = update_status(&mut tx, doc.id, DocumentStatus::Failed, MAX_RETRIES)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(failed.status, DocumentStatus::Failed);
    assert_eq!(failed.retry_count, 0);
}

#[tokio::test]
async fn retry_is_the_only_path_that_increments_the_count() {
    let pool = cortex_db::testkit_db_pool().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    let doc = create_document(&mut tx, &unique_source()).await.unwrap();
    update_status(&mut tx, doc.id, DocumentStatus::Failed, MAX_RETRIES)
        .await
        .unwrap();
    let retried = retry_document(&mut tx, doc.id, MAX_RETRIES).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(retried.status, DocumentStatus::Pending);
    assert_eq!(retried.retry_count, 1);

    // Retrying a non-FAILED document is an illegal edge.
    let mut tx = pool.begin().await.unwrap();
    match retry_document(&mut tx, doc.id, MAX_RETRIES).await {
        Err(RepoError::InvalidTransition { from, to }) => {
            assert_eq!(from, DocumentStatus::Pending);
            assert_eq!(to, DocumentStatus::Pending);
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn file_path_round_trips_and_clears() {
    let pool = cortex_db::testkit_db_pool().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    let doc = create_document(&mut tx, &unique_source()).await.unwrap();
    let with_file = set_file_path(&mut tx, doc.id, "/tmp/uploads/a.txt")
        .await
        .unwrap();
    assert_eq!(with_file.file_path.as_deref(), Some("/tmp/uploads/a.txt"));

    let cleared = clear_file_path(&mut tx, doc.id).await.unwrap();
    assert!(cleared.file_path.is_none());
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn contending_transactions_serialize_on_the_row_lock() {
    let pool = cortex_db::testkit_db_pool().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    let doc = create_document(&mut tx, &unique_source()).await.unwrap();
    tx.commit().await.unwrap();

    // First claimant takes the lock and moves the row to PROCESSING.
    let mut tx1 = pool.begin().await.unwrap();
    update_status(&mut tx1, doc.id, DocumentStatus::Processing, MAX_RETRIES)
        .await
        .unwrap();

    // Second claimant blocks on the lock until tx1 commits, then observes
    // PROCESSING and must abort its claim.
    let pool2 = pool.clone();
    let id = doc.id;
    let loser = tokio::spawn(async move {
        let mut tx2 = pool2.begin().await.unwrap();
        let seen = document_by_id_for_update(&mut tx2, id)
            .await
            .unwrap()
            .unwrap();
        tx2.rollback().await.unwrap();
        seen.status
    });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    tx1.commit().await.unwrap();

    assert_eq!(loser.await.unwrap(), DocumentStatus::Processing);
}
