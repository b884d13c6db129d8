//! Scenario: queue round-trip discipline.
//!
//! enqueue → dequeue → acknowledge must leave all three lists exactly as
//! they started, and a dequeued payload must carry the visibility timestamp
//! that the sweeper keys on.

use cortex_queue::PROCESSING_QUEUE;
use cortex_schemas::QueueEntry;
use cortex_testkit::memory_queue;
use uuid::Uuid;

#[tokio::test]
async fn roundtrip_leaves_all_lists_unchanged() {
    let (queue, _broker) = memory_queue();
    let id = Uuid::new_v4();

    queue.enqueue(id).await.unwrap();
    assert_eq!(queue.main_len().await.unwrap(), 1);

    let (doc_id, raw) = queue.dequeue().await.unwrap().expect("entry expected");
    assert_eq!(doc_id, id);
    assert_eq!(queue.main_len().await.unwrap(), 0);
    assert_eq!(queue.processing_len().await.unwrap(), 1);

    queue.acknowledge(&raw).await.unwrap();
    assert_eq!(queue.main_len().await.unwrap(), 0);
    assert_eq!(queue.processing_len().await.unwrap(), 0);
    assert_eq!(queue.dlq_len().await.unwrap(), 0);
}

#[tokio::test]
async fn dequeue_enriches_the_entry_with_started_at() {
    let (queue, broker) = memory_queue();
    let id = Uuid::new_v4();

    queue.enqueue(id).await.unwrap();
    let (_, raw) = queue.dequeue().await.unwrap().expect("entry expected");

    let entry: QueueEntry = serde_json::from_slice(&raw).unwrap();
    assert_eq!(entry.document_id, id);
    assert!(entry.started_at.is_some(), "visibility timestamp missing");

    // The in-flight list must hold exactly the bytes handed back to the
    // caller; acknowledge removes by byte match.
    let in_flight = broker.snapshot(PROCESSING_QUEUE);
    assert_eq!(in_flight, vec![raw]);
}

#[tokio::test]
async fn dequeue_on_empty_queue_times_out_to_none() {
    let (queue, _broker) = memory_queue();
    assert!(queue.dequeue().await.unwrap().is_none());
}

#[tokio::test]
async fn delivery_order_is_fifo() {
    let (queue, _broker) = memory_queue();
    let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

    for id in &ids {
        queue.enqueue(*id).await.unwrap();
    }

    for expected in &ids {
        let (got, raw) = queue.dequeue().await.unwrap().expect("entry expected");
        assert_eq!(got, *expected);
        queue.acknowledge(&raw).await.unwrap();
    }
}

#[tokio::test]
async fn acknowledge_of_absent_entry_is_not_an_error() {
    let (queue, _broker) = memory_queue();
    let payload = serde_json::to_vec(&QueueEntry::new(Uuid::new_v4())).unwrap();
    queue.acknowledge(&payload).await.unwrap();
}

#[tokio::test]
async fn enqueue_surfaces_broker_failure() {
    let (queue, broker) = memory_queue();
    broker.set_broken(true);
    assert!(queue.enqueue(Uuid::new_v4()).await.is_err());

    broker.set_broken(false);
    queue.enqueue(Uuid::new_v4()).await.unwrap();
    assert_eq!(queue.main_len().await.unwrap(), 1);
}
