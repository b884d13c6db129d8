//! The document job queue over a [`Broker`].

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cortex_schemas::{DlqEntry, QueueEntry, SweepReport};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    Broker, QueueError, DEAD_LETTER_QUEUE, MAIN_QUEUE, PROCESSING_QUEUE,
};

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Durable FIFO queue with at-least-once delivery.
///
/// Acknowledge removes by exact byte match on the enriched payload returned
/// from [`dequeue`](DocumentQueue::dequeue); callers must hand those same
/// bytes back.
#[derive(Clone)]
pub struct DocumentQueue {
    broker: Arc<dyn Broker>,
    dequeue_timeout: Duration,
}

impl DocumentQueue {
    pub fn new(broker: Arc<dyn Broker>, dequeue_timeout: Duration) -> Self {
        Self {
            broker,
            dequeue_timeout,
        }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Append a fresh entry for `document_id` to the tail of MAIN.
    ///
    /// The document must already be committed in the store (commit-then-
    /// publish); on error the caller compensates.
    pub async fn enqueue(&self, document_id: Uuid) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(&QueueEntry::new(document_id))
            .expect("queue entry serialization is infallible");
        self.broker.push_tail(MAIN_QUEUE, &payload).await
    }

    /// Atomically move the head of MAIN into PROCESSING and return the
    /// document id plus the exact in-flight payload bytes.
    ///
    /// Blocks up to the configured timeout; `None` when no work arrived.
    /// Malformed entries are quarantined to the DLQ and reported as `None`.
    pub async fn dequeue(&self) -> Result<Option<(Uuid, Vec<u8>)>, QueueError> {
        let Some(raw) = self
            .broker
            .pop_tail_push_head(MAIN_QUEUE, PROCESSING_QUEUE, self.dequeue_timeout)
            .await?
        else {
            return Ok(None);
        };

        let entry: QueueEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                self.move_to_dlq(&raw, &format!("parse error: {e}")).await?;
                self.broker
                    .remove_value(PROCESSING_QUEUE, 1, &raw)
                    .await?;
                return Ok(None);
            }
        };

        // Stamp the visibility timestamp on first observation. The window
        // between the pop and this replacement is what the sweeper treats as
        // "mid-enrichment" (no started_at => skip).
        if entry.started_at.is_none() {
            let enriched = QueueEntry {
                document_id: entry.document_id,
                started_at: Some(now_epoch()),
                retry_count: entry.retry_count,
            };
            let enriched_payload = serde_json::to_vec(&enriched)
                .expect("queue entry serialization is infallible");
            self.broker
                .remove_value(PROCESSING_QUEUE, 1, &raw)
                .await?;
            self.broker
                .push_head(PROCESSING_QUEUE, &enriched_payload)
                .await?;
            return Ok(Some((entry.document_id, enriched_payload)));
        }

        Ok(Some((entry.document_id, raw)))
    }

    /// Remove one occurrence of `raw` from PROCESSING after successful
    /// completion. A miss (already swept, legacy payload shape) logs a
    /// warning and is not an error.
    pub async fn acknowledge(&self, raw: &[u8]) -> Result<(), QueueError> {
        let mut removed = self
            .broker
            .remove_value(PROCESSING_QUEUE, 1, raw)
            .await?;

        if removed == 0 {
            // The entry may still be in its pre-enrichment form.
            if let Ok(entry) = serde_json::from_slice::<QueueEntry>(raw) {
                let legacy = serde_json::to_vec(&QueueEntry::new(entry.document_id))
                    .expect("queue entry serialization is infallible");
                removed = self
                    .broker
                    .remove_value(PROCESSING_QUEUE, 1, &legacy)
                    .await?;
            }
        }

        if removed == 0 {
            warn!(
                payload = %String::from_utf8_lossy(&raw[..raw.len().min(100)]),
                "job not found in processing queue during ack"
            );
        }

        Ok(())
    }

    /// Quarantine a payload with a reason. Encoding never fails; a
    /// stringified fallback is used if it somehow would.
    pub async fn move_to_dlq(&self, raw: &[u8], reason: &str) -> Result<(), QueueError> {
        let entry = DlqEntry {
            payload: String::from_utf8_lossy(raw).into_owned(),
            reason: reason.to_string(),
            timestamp: now_epoch(),
        };

        let payload = serde_json::to_vec(&entry)
            .unwrap_or_else(|_| format!("{entry:?}").into_bytes());
        self.broker.push_tail(DEAD_LETTER_QUEUE, &payload).await?;

        error!(reason, payload = %entry.payload.chars().take(100).collect::<String>(), "moved to DLQ");
        Ok(())
    }

    pub async fn main_len(&self) -> Result<u64, QueueError> {
        self.broker.list_len(MAIN_QUEUE).await
    }

    pub async fn processing_len(&self) -> Result<u64, QueueError> {
        self.broker.list_len(PROCESSING_QUEUE).await
    }

    pub async fn dlq_len(&self) -> Result<u64, QueueError> {
        self.broker.list_len(DEAD_LETTER_QUEUE).await
    }

    /// Sweep PROCESSING for entries whose visibility window has expired.
    ///
    /// Timestamp-less entries are mid-enrichment and skipped. Expired entries
    /// go back to the head of MAIN with `retry_count + 1` and no
    /// `started_at`, unless the per-entry budget is spent, in which case they
    /// are quarantined. Safe under concurrent sweepers: each removal is a
    /// single atomic LREM, and an entry another runner already removed is
    /// left alone.
    pub async fn requeue_stale(
        &self,
        max_age: Duration,
        max_retries: u32,
    ) -> Result<SweepReport, QueueError> {
        let now = now_epoch();
        let items = self.broker.list_range(PROCESSING_QUEUE).await?;
        let mut report = SweepReport::default();

        for item in items {
            let entry: QueueEntry = match serde_json::from_slice(&item) {
                Ok(entry) => entry,
                Err(e) => {
                    if self
                        .broker
                        .remove_value(PROCESSING_QUEUE, 1, &item)
                        .await?
                        > 0
                    {
                        self.move_to_dlq(&item, &format!("malformed in processing queue: {e}"))
                            .await?;
                        report.moved_to_dlq += 1;
                    }
                    continue;
                }
            };

            let Some(started_at) = entry.started_at else {
                report.skipped += 1;
                continue;
            };

            let age = now - started_at;
            if age < max_age.as_secs_f64() {
                report.skipped += 1;
                continue;
            }

            // Claim the entry; zero removals means another sweeper won.
            if self
                .broker
                .remove_value(PROCESSING_QUEUE, 1, &item)
                .await?
                == 0
            {
                report.skipped += 1;
                continue;
            }

            let retry_count = entry.retry_count.unwrap_or(0);
            if retry_count >= max_retries {
                self.move_to_dlq(
                    &item,
                    &format!("exceeded {max_retries} retries after {age:.0}s"),
                )
                .await?;
                report.moved_to_dlq += 1;
                continue;
            }

            let requeued = QueueEntry {
                document_id: entry.document_id,
                started_at: None,
                retry_count: Some(retry_count + 1),
            };
            let payload = serde_json::to_vec(&requeued)
                .expect("queue entry serialization is infallible");
            self.broker.push_head(MAIN_QUEUE, &payload).await?;
            report.requeued += 1;

            info!(
                document_id = %entry.document_id,
                retry = retry_count + 1,
                age_secs = age as u64,
                "requeued stale job"
            );
        }

        if report.requeued > 0 || report.moved_to_dlq > 0 {
            info!(
                requeued = report.requeued,
                moved_to_dlq = report.moved_to_dlq,
                skipped = report.skipped,
                "stale job sweep"
            );
        }

        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Per-document retry counter (the worker's failure-accounting authority)
    // -----------------------------------------------------------------------

    pub async fn retry_count(&self, document_id: Uuid) -> Result<u64, QueueError> {
        Ok(self
            .broker
            .counter_get(&crate::retry_key(document_id))
            .await?
            .unwrap_or(0))
    }

    pub async fn bump_retry(&self, document_id: Uuid) -> Result<u64, QueueError> {
        self.broker
            .counter_incr(&crate::retry_key(document_id))
            .await
    }

    pub async fn clear_retry(&self, document_id: Uuid) -> Result<(), QueueError> {
        self.broker.delete(&crate::retry_key(document_id)).await
    }

    /// Quarantine an exhausted document by bare id (the worker's terminal
    /// signal; distinct from the structured payload quarantine above).
    pub async fn push_dlq_id(&self, document_id: Uuid) -> Result<(), QueueError> {
        self.broker
            .push_head(DEAD_LETTER_QUEUE, document_id.to_string().as_bytes())
            .await
    }
}
