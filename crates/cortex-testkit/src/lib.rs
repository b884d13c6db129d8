//! In-process doubles for the pipeline's external collaborators, plus the
//! cross-crate scenario tests under `tests/`.
//!
//! `MemoryBroker` reproduces the broker list semantics the queue depends on
//! (tail push, head push, blocking tail-pop-head-push, count-limited
//! removal), so queue and worker behavior can be exercised without Redis.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cortex_ingest::{AppError, ProcessDocument};
use cortex_queue::{Broker, DocumentQueue, QueueError};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// MemoryBroker
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BrokerState {
    lists: HashMap<String, VecDeque<Vec<u8>>>,
    counters: HashMap<String, u64>,
}

/// Broker double over process-local lists. Head = front, tail = back.
///
/// `set_broken(true)` makes every subsequent operation fail, for exercising
/// the compensation paths.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
    broken: AtomicBool,
    fail_pushes: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    /// Fail only write appends, leaving reads healthy. Exercises the
    /// commit-then-publish compensation path, where the backpressure read
    /// succeeds and the enqueue does not.
    pub fn set_fail_pushes(&self, fail: bool) {
        self.fail_pushes.store(fail, Ordering::SeqCst);
    }

    fn check_push(&self) -> Result<(), QueueError> {
        self.check()?;
        if self.fail_pushes.load(Ordering::SeqCst) {
            Err(QueueError::BrokerUnavailable(
                "injected push fault".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn check(&self) -> Result<(), QueueError> {
        if self.broken.load(Ordering::SeqCst) {
            Err(QueueError::BrokerUnavailable(
                "injected broker fault".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Raw list contents, head first (test assertions).
    pub fn snapshot(&self, key: &str) -> Vec<Vec<u8>> {
        self.lock()
            .lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn push_tail(&self, key: &str, value: &[u8]) -> Result<(), QueueError> {
        self.check_push()?;
        self.lock()
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_vec());
        Ok(())
    }

    async fn push_head(&self, key: &str, value: &[u8]) -> Result<(), QueueError> {
        self.check_push()?;
        self.lock()
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_vec());
        Ok(())
    }

    async fn pop_tail_push_head(
        &self,
        src: &str,
        dst: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.check()?;
            {
                let mut state = self.lock();
                let popped = state.lists.get_mut(src).and_then(|l| l.pop_back());
                if let Some(value) = popped {
                    state
                        .lists
                        .entry(dst.to_string())
                        .or_default()
                        .push_front(value.clone());
                    return Ok(Some(value));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn list_len(&self, key: &str) -> Result<u64, QueueError> {
        self.check()?;
        Ok(self.lock().lists.get(key).map(|l| l.len()).unwrap_or(0) as u64)
    }

    async fn list_range(&self, key: &str) -> Result<Vec<Vec<u8>>, QueueError> {
        self.check()?;
        Ok(self.snapshot(key))
    }

    async fn remove_value(
        &self,
        key: &str,
        count: i64,
        value: &[u8],
    ) -> Result<u64, QueueError> {
        self.check()?;
        let mut state = self.lock();
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(0);
        };

        let mut removed = 0u64;
        let mut kept = VecDeque::with_capacity(list.len());
        for item in list.drain(..) {
            if (count <= 0 || removed < count as u64) && item == value {
                removed += 1;
            } else {
                kept.push_back(item);
            }
        }
        *list = kept;
        Ok(removed)
    }

    async fn counter_get(&self, key: &str) -> Result<Option<u64>, QueueError> {
        self.check()?;
        Ok(self.lock().counters.get(key).copied())
    }

    async fn counter_incr(&self, key: &str) -> Result<u64, QueueError> {
        self.check()?;
        let mut state = self.lock();
        let entry = state.counters.entry(key.to_string()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn delete(&self, key: &str) -> Result<(), QueueError> {
        self.check()?;
        let mut state = self.lock();
        state.counters.remove(key);
        state.lists.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.check()
    }
}

/// Queue over a fresh in-process broker, with a short dequeue timeout so
/// empty-queue assertions stay fast.
pub fn memory_queue() -> (DocumentQueue, Arc<MemoryBroker>) {
    let broker = Arc::new(MemoryBroker::new());
    let queue = DocumentQueue::new(
        Arc::clone(&broker) as Arc<dyn Broker>,
        Duration::from_millis(50),
    );
    (queue, broker)
}

// ---------------------------------------------------------------------------
// ScriptedProcessor
// ---------------------------------------------------------------------------

enum Script {
    AlwaysOk,
    AlwaysFail,
    /// Fail this many times, then succeed.
    FailThenOk(AtomicU32),
}

/// Stand-in for the document processor so the worker loop's ack/retry/DLQ
/// discipline can be exercised without a database.
pub struct ScriptedProcessor {
    script: Script,
    processed: Mutex<Vec<Uuid>>,
    failed_marks: Mutex<Vec<Uuid>>,
}

impl ScriptedProcessor {
    pub fn always_ok() -> Self {
        Self::with_script(Script::AlwaysOk)
    }

    pub fn always_fail() -> Self {
        Self::with_script(Script::AlwaysFail)
    }

    pub fn fail_times(n: u32) -> Self {
        Self::with_script(Script::FailThenOk(AtomicU32::new(n)))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            processed: Mutex::new(Vec::new()),
            failed_marks: Mutex::new(Vec::new()),
        }
    }

    pub fn process_calls(&self) -> Vec<Uuid> {
        self.processed.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn mark_failed_calls(&self) -> Vec<Uuid> {
        self.failed_marks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ProcessDocument for ScriptedProcessor {
    async fn process(&self, document_id: Uuid) -> Result<(), AppError> {
        self.processed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(document_id);

        let fail = match &self.script {
            Script::AlwaysOk => false,
            Script::AlwaysFail => true,
            Script::FailThenOk(remaining) => {
                let prev = remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                        Some(v.saturating_sub(1))
                    })
                    .unwrap_or(0);
                prev > 0
            }
        };

        if fail {
            Err(AppError::Infra("scripted processing failure".to_string()))
        } else {
            Ok(())
        }
    }

    async fn mark_failed(&self, document_id: Uuid) -> Result<(), AppError> {
        self.failed_marks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(document_id);
        Ok(())
    }
}
