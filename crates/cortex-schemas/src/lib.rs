use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retry budget for a document before it is parked in the dead-letter queue.
/// Overridable at runtime via `CORTEX_MAX_RETRIES` (see cortex-config).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// ---------------------------------------------------------------------------
// DocumentStatus
// ---------------------------------------------------------------------------

/// Lifecycle states of a document row.
///
/// Stored as uppercase strings in Postgres and on the wire. The legal
/// transition set is enforced by `cortex_db::check_transition`; this type only
/// names the states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Done => "DONE",
            DocumentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(DocumentStatus::Pending),
            "PROCESSING" => Some(DocumentStatus::Processing),
            "DONE" => Some(DocumentStatus::Done),
            "FAILED" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }

    /// DONE is terminal for the normal path; no edge leaves it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Done)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Queue wire types
// ---------------------------------------------------------------------------

/// A job as it travels through the broker lists.
///
/// `started_at` and `retry_count` are omitted from the JSON when absent —
/// acknowledgment removes by exact byte match, so the enriched payload must
/// serialize identically every time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub document_id: Uuid,
    /// Epoch seconds at which the entry was observed in the in-flight list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<f64>,
    /// Set on requeue after visibility-timeout expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

impl QueueEntry {
    pub fn new(document_id: Uuid) -> Self {
        Self {
            document_id,
            started_at: None,
            retry_count: None,
        }
    }
}

/// A quarantined job plus the reason it was parked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    /// Raw original payload (lossy-decoded when it was not valid UTF-8).
    pub payload: String,
    pub reason: String,
    /// Epoch seconds at quarantine time.
    pub timestamp: f64,
}

/// Counters returned by a stale-job sweep over the in-flight list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub requeued: u64,
    pub moved_to_dlq: u64,
    pub skipped: u64,
}

// ---------------------------------------------------------------------------
// Vector index payload
// ---------------------------------------------------------------------------

/// Payload stored alongside each point in the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub document_id: Uuid,
    pub chunk_index: usize,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Search wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub text: String,
    pub score: f32,
    pub document_id: Uuid,
    pub chunk_index: usize,
}
