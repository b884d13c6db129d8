//! Broker-backed document job queue.
//!
//! Three logical lists over one broker: MAIN (awaiting work), PROCESSING
//! (claimed, unacknowledged), DLQ (poisoned or exhausted). Delivery is
//! at-least-once; consumers must process idempotently.

use std::fmt;

pub mod broker;
pub mod queue;

pub use broker::{Broker, RedisBroker};
pub use queue::DocumentQueue;

/// Well-known broker keys.
pub const MAIN_QUEUE: &str = "document_ingestion_queue";
pub const PROCESSING_QUEUE: &str = "document_processing_queue";
pub const DEAD_LETTER_QUEUE: &str = "document_dead_letter_queue";
/// Per-document consecutive-failure counter: `retry:{document_id}`.
pub const RETRY_KEY_PREFIX: &str = "retry:";

pub fn retry_key(document_id: uuid::Uuid) -> String {
    format!("{RETRY_KEY_PREFIX}{document_id}")
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors the queue layer may return.
#[derive(Debug)]
pub enum QueueError {
    /// The broker rejected or dropped the operation; the caller must
    /// compensate (the ingest path marks the document FAILED).
    BrokerUnavailable(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::BrokerUnavailable(msg) => write!(f, "broker unavailable: {msg}"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        QueueError::BrokerUnavailable(e.to_string())
    }
}
