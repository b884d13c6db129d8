//! Scenario: the worker loop's ack/retry/DLQ discipline, exercised over the
//! in-process broker with a scripted processor — no database required.

use std::sync::Arc;
use std::time::Duration;

use cortex_services::MemoryIndex;
use cortex_testkit::{memory_queue, ScriptedProcessor};
use cortex_worker::{DocumentWorker, WorkerDeps};
use uuid::Uuid;

const MAX_RETRIES: u32 = 3;

fn make_worker(
    queue: cortex_queue::DocumentQueue,
    processor: Arc<ScriptedProcessor>,
) -> DocumentWorker {
    DocumentWorker::new(WorkerDeps {
        queue,
        processor,
        index: Arc::new(MemoryIndex::new()),
        max_retries: MAX_RETRIES,
    })
}

#[tokio::test]
async fn success_acknowledges_and_clears_the_retry_counter() {
    let (queue, _broker) = memory_queue();
    let processor = Arc::new(ScriptedProcessor::always_ok());
    let worker = make_worker(queue.clone(), Arc::clone(&processor));

    let id = Uuid::new_v4();
    queue.bump_retry(id).await.unwrap(); // an earlier failure on record
    queue.enqueue(id).await.unwrap();

    assert!(worker.tick().await.unwrap());

    assert_eq!(processor.process_calls(), vec![id]);
    assert_eq!(queue.processing_len().await.unwrap(), 0);
    assert_eq!(queue.main_len().await.unwrap(), 0);
    assert_eq!(queue.retry_count(id).await.unwrap(), 0, "counter deleted");
}

#[tokio::test]
async fn failure_bumps_the_counter_and_leaves_the_entry_in_flight() {
    let (queue, _broker) = memory_queue();
    let processor = Arc::new(ScriptedProcessor::always_fail());
    let worker = make_worker(queue.clone(), Arc::clone(&processor));

    let id = Uuid::new_v4();
    queue.enqueue(id).await.unwrap();

    assert!(worker.tick().await.unwrap());

    // No acknowledgment: the job waits for the sweeper.
    assert_eq!(queue.processing_len().await.unwrap(), 1);
    assert_eq!(queue.main_len().await.unwrap(), 0);
    assert_eq!(queue.retry_count(id).await.unwrap(), 1);
    assert!(processor.mark_failed_calls().is_empty());
}

#[tokio::test]
async fn exhausted_retry_budget_dead_letters_and_marks_failed() {
    let (queue, broker) = memory_queue();
    let processor = Arc::new(ScriptedProcessor::always_fail());
    let worker = make_worker(queue.clone(), Arc::clone(&processor));

    let id = Uuid::new_v4();
    for _ in 0..MAX_RETRIES {
        queue.bump_retry(id).await.unwrap();
    }
    queue.enqueue(id).await.unwrap();

    assert!(worker.tick().await.unwrap());

    // Processor is not invoked again for an exhausted document.
    assert!(processor.process_calls().is_empty());
    assert_eq!(processor.mark_failed_calls(), vec![id]);

    // Quarantined by bare id, acknowledged out of the in-flight list, and
    // the counter deleted.
    let dlq = broker.snapshot(cortex_queue::DEAD_LETTER_QUEUE);
    assert_eq!(dlq, vec![id.to_string().into_bytes()]);
    assert_eq!(queue.processing_len().await.unwrap(), 0);
    assert_eq!(queue.retry_count(id).await.unwrap(), 0);
}

#[tokio::test]
async fn retry_cycle_converges_to_the_dlq() {
    let (queue, _broker) = memory_queue();
    let processor = Arc::new(ScriptedProcessor::always_fail());
    let worker = make_worker(queue.clone(), Arc::clone(&processor));

    let id = Uuid::new_v4();
    queue.enqueue(id).await.unwrap();

    // Each cycle: the worker fails the job, the sweeper expires it back to
    // MAIN. With a zero visibility window the loop converges immediately.
    for _ in 0..MAX_RETRIES {
        assert!(worker.tick().await.unwrap());
        let report = queue
            .requeue_stale(Duration::ZERO, MAX_RETRIES)
            .await
            .unwrap();
        assert_eq!(report.requeued, 1);
    }

    // Budget is spent: the next delivery dead-letters the document.
    assert!(worker.tick().await.unwrap());

    assert_eq!(processor.process_calls().len(), MAX_RETRIES as usize);
    assert_eq!(processor.mark_failed_calls(), vec![id]);
    assert_eq!(queue.dlq_len().await.unwrap(), 1);
    assert_eq!(queue.main_len().await.unwrap(), 0);
    assert_eq!(queue.processing_len().await.unwrap(), 0);
    assert_eq!(queue.retry_count(id).await.unwrap(), 0);
}

#[tokio::test]
async fn intermittent_failure_recovers_without_dead_lettering() {
    let (queue, _broker) = memory_queue();
    let processor = Arc::new(ScriptedProcessor::fail_times(2));
    let worker = make_worker(queue.clone(), Arc::clone(&processor));

    let id = Uuid::new_v4();
    queue.enqueue(id).await.unwrap();

    for _ in 0..2 {
        assert!(worker.tick().await.unwrap());
        queue
            .requeue_stale(Duration::ZERO, MAX_RETRIES)
            .await
            .unwrap();
    }
    assert!(worker.tick().await.unwrap());

    assert_eq!(processor.process_calls().len(), 3);
    assert!(processor.mark_failed_calls().is_empty());
    assert_eq!(queue.dlq_len().await.unwrap(), 0);
    assert_eq!(queue.processing_len().await.unwrap(), 0);
    assert_eq!(queue.retry_count(id).await.unwrap(), 0);
}

#[tokio::test]
async fn run_loop_processes_until_stopped() {
    let (queue, _broker) = memory_queue();
    let processor = Arc::new(ScriptedProcessor::always_ok());
    let worker = Arc::new(make_worker(queue.clone(), Arc::clone(&processor)));

    let id = Uuid::new_v4();
    queue.enqueue(id).await.unwrap();

    let handle = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.run().await })
    };

    // Give the loop time to drain the job, then stop it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    worker.stop();
    handle.await.unwrap().unwrap();

    assert_eq!(processor.process_calls(), vec![id]);
    assert_eq!(queue.processing_len().await.unwrap(), 0);
}
