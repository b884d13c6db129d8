//! Background worker: dequeue, process, ack/retry/DLQ, plus the periodic
//! stale-job sweeper.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cortex_ingest::ProcessDocument;
use cortex_queue::DocumentQueue;
use cortex_services::VectorIndex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Dependencies and counters
// ---------------------------------------------------------------------------

/// Injected dependencies; the binary builds one of these, tests build theirs
/// around an in-process broker and a scripted processor.
pub struct WorkerDeps {
    pub queue: DocumentQueue,
    pub processor: Arc<dyn ProcessDocument>,
    pub index: Arc<dyn VectorIndex>,
    pub max_retries: u32,
}

/// Monotonic outcome counters, surfaced in heartbeat logs.
#[derive(Default)]
pub struct WorkerStats {
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub dead_lettered: AtomicU64,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// One logical worker per process; any number of processes may run against
/// the same broker and store — the row lock serializes them per document.
pub struct DocumentWorker {
    deps: WorkerDeps,
    running: Arc<AtomicBool>,
    pub stats: WorkerStats,
}

impl DocumentWorker {
    pub fn new(deps: WorkerDeps) -> Self {
        Self {
            deps,
            running: Arc::new(AtomicBool::new(true)),
            stats: WorkerStats::default(),
        }
    }

    /// Shared stop flag for signal handlers.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("worker stopping");
    }

    /// Supervised loop. Runs until [`stop`](Self::stop); the current job is
    /// always finished to a safe point (ack or left in-flight) before exit.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Idempotent, once at startup.
        self.deps
            .index
            .ensure_collection()
            .await
            .map_err(|e| anyhow::anyhow!("ensure collection failed: {e}"))?;

        info!("worker starting, waiting for jobs");
        let mut job_count: u64 = 0;

        while self.running.load(Ordering::SeqCst) {
            match self.tick().await {
                Ok(true) => {
                    job_count += 1;
                    if job_count % 10 == 0 {
                        info!(
                            processed = job_count,
                            succeeded = self.stats.succeeded.load(Ordering::Relaxed),
                            failed = self.stats.failed.load(Ordering::Relaxed),
                            dead_lettered = self.stats.dead_lettered.load(Ordering::Relaxed),
                            "worker alive"
                        );
                    }
                }
                Ok(false) => tokio::time::sleep(Duration::from_secs(1)).await,
                Err(e) => {
                    error!(error = %e, "worker loop error");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }

        info!("worker stopped");
        Ok(())
    }

    /// One loop iteration; `Ok(true)` when a job was handled.
    pub async fn tick(&self) -> Result<bool, cortex_queue::QueueError> {
        let Some((document_id, raw)) = self.deps.queue.dequeue().await? else {
            return Ok(false);
        };

        info!(%document_id, "received job");
        self.handle_job(document_id, &raw).await?;
        Ok(true)
    }

    /// Retry/ack/DLQ discipline for a claimed job.
    ///
    /// The broker-side `retry:{id}` counter is the authority for marking a
    /// document FAILED: it counts consecutive processing failures across
    /// deliveries. The per-entry `retry_count` only bounds how often the
    /// sweeper redelivers a stale entry.
    async fn handle_job(
        &self,
        document_id: Uuid,
        raw: &[u8],
    ) -> Result<(), cortex_queue::QueueError> {
        let retries = self.deps.queue.retry_count(document_id).await?;

        if retries >= self.deps.max_retries as u64 {
            self.deps.queue.push_dlq_id(document_id).await?;

            if let Err(e) = self.deps.processor.mark_failed(document_id).await {
                error!(%document_id, error = %e, "could not mark exhausted document FAILED");
            }

            // Ack so the zombie entry is not redelivered forever.
            self.deps.queue.acknowledge(raw).await?;
            self.deps.queue.clear_retry(document_id).await?;
            self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
            error!(%document_id, retries, "document moved to DLQ");
            return Ok(());
        }

        match self.deps.processor.process(document_id).await {
            Ok(()) => {
                self.deps.queue.clear_retry(document_id).await?;
                self.deps.queue.acknowledge(raw).await?;
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                info!(%document_id, "acknowledged job");
            }
            Err(e) => {
                // Deliberately no ack: the entry stays in PROCESSING until
                // the visibility timeout expires and the sweeper requeues it.
                let retry = self.deps.queue.bump_retry(document_id).await?;
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(%document_id, retry, error = %e, "processing failed, retry scheduled");
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stale-job sweeper
// ---------------------------------------------------------------------------

/// Spawn the periodic visibility-timeout sweep over the in-flight list.
///
/// Intended to run in one process, but safe under accidental concurrent
/// runners — every entry removal inside the sweep is atomic.
pub fn spawn_sweeper(
    queue: DocumentQueue,
    interval: Duration,
    max_age: Duration,
    max_retries: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately; skip it so a fresh boot does not
        // sweep before workers had a chance to enrich their claims.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = queue.requeue_stale(max_age, max_retries).await {
                warn!(error = %e, "stale job sweep failed");
            }
        }
    })
}
