//! Shared runtime state for cortex-daemon.
//!
//! One `AppState` per process, constructed at startup with every external
//! client it will ever use, injected into handlers via `State<Arc<AppState>>`
//! and dropped on shutdown. No process-global singletons.

use std::sync::Arc;
use std::time::Duration;

use cortex_config::Settings;
use cortex_ingest::{IngestService, SearchService, UploadService};
use cortex_queue::{Broker, DocumentQueue};
use cortex_services::{Embedder, FileStore, Llm, VectorIndex};
use sqlx::PgPool;

pub struct AppState {
    pub settings: Settings,
    pub pool: PgPool,
    pub queue: DocumentQueue,
    pub ingest: IngestService,
    pub upload: UploadService,
    pub search: SearchService,
    /// Kept for the readiness probe.
    pub index: Arc<dyn VectorIndex>,
}

impl AppState {
    /// Wire the full service graph over the given clients. Tests pass an
    /// in-process broker and mock collaborators; `main.rs` passes Redis and
    /// the configured production implementations.
    pub fn new(
        settings: Settings,
        pool: PgPool,
        broker: Arc<dyn Broker>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        llm: Arc<dyn Llm>,
    ) -> Self {
        let queue = DocumentQueue::new(
            broker,
            Duration::from_secs(settings.dequeue_timeout_secs),
        );

        let ingest = IngestService::new(
            pool.clone(),
            queue.clone(),
            settings.queue_max_length,
            settings.max_retries,
        );
        let upload = UploadService::new(
            pool.clone(),
            queue.clone(),
            FileStore::new(settings.upload_dir.clone()),
            settings.queue_max_length,
        );
        let search = SearchService::new(embedder, Arc::clone(&index), llm);

        Self {
            settings,
            pool,
            queue,
            ingest,
            upload,
            search,
            index,
        }
    }
}
