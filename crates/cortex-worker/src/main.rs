//! cortex-worker entry point.
//!
//! Builds the dependency set once, spawns the stale-job sweeper, installs
//! signal handlers and hands control to the worker loop. Exits non-zero on
//! unrecoverable initialization errors.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cortex_config::Settings;
use cortex_ingest::DocumentProcessor;
use cortex_queue::{DocumentQueue, RedisBroker};
use cortex_services::{wiring, FileStore};
use cortex_worker::{spawn_sweeper, DocumentWorker, WorkerDeps};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let settings = Settings::from_env();

    let pool = cortex_db::connect(&settings).await?;
    let broker = RedisBroker::connect(
        &settings.redis_url,
        Duration::from_secs(settings.broker_timeout_secs),
    )
    .await
    .context("redis connect failed")?;
    let queue = DocumentQueue::new(
        Arc::new(broker),
        Duration::from_secs(settings.dequeue_timeout_secs),
    );

    let http = reqwest::Client::new();
    let embedder = wiring::build_embedder(&settings, &http);
    let index = wiring::build_vector_index(&settings, &http);

    let processor = Arc::new(DocumentProcessor::new(
        pool,
        Arc::clone(&embedder),
        Arc::clone(&index),
        FileStore::new(settings.upload_dir.clone()),
        settings.chunk_size,
        settings.chunk_overlap,
        settings.max_retries,
    ));

    let worker = DocumentWorker::new(WorkerDeps {
        queue: queue.clone(),
        processor,
        index,
        max_retries: settings.max_retries,
    });

    spawn_sweeper(
        queue,
        Duration::from_secs(settings.sweep_interval_secs),
        Duration::from_secs(settings.visibility_timeout_secs),
        settings.max_retries,
    );

    spawn_signal_handler(worker.stop_handle());

    worker.run().await
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Flip the shared stop flag on SIGINT/SIGTERM; the loop then finishes its
/// current job to a safe point and returns.
fn spawn_signal_handler(running: Arc<std::sync::atomic::AtomicBool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {},
                _ = term.recv() => {},
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        info!("termination signal received");
        running.store(false, Ordering::SeqCst);
    });
}
