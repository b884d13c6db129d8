//! cortex-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, builds the shared
//! state, verifies infrastructure connectivity, wires middleware, and starts
//! the HTTP server. All route handlers live in `routes.rs`; all shared state
//! lives in `state.rs`. Exits non-zero when any readiness check fails at boot.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{bail, Context};
use axum::http::{HeaderValue, Method};
use cortex_config::Settings;
use cortex_daemon::{routes, state};
use cortex_queue::{Broker, RedisBroker};
use cortex_services::wiring;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let settings = Settings::from_env();

    let pool = cortex_db::connect(&settings).await?;
    cortex_db::migrate(&pool).await?;

    let broker: Arc<dyn Broker> = Arc::new(
        RedisBroker::connect(
            &settings.redis_url,
            Duration::from_secs(settings.broker_timeout_secs),
        )
        .await
        .context("redis connect failed")?,
    );

    let http = reqwest::Client::new();
    let embedder = wiring::build_embedder(&settings, &http);
    let index = wiring::build_vector_index(&settings, &http);
    let llm = wiring::build_llm(&settings, &http);

    // Boot readiness: refuse to serve with a broken dependency.
    broker.ping().await.context("redis not ready at boot")?;
    index
        .ping()
        .await
        .map_err(|e| anyhow::anyhow!("vector index not ready at boot: {e}"))?;
    let db = cortex_db::db_status(&pool).await?;
    if !db.ok || !db.has_documents_table {
        bail!("postgres not ready at boot: {db:?}");
    }

    let shared = Arc::new(state::AppState::new(
        settings.clone(),
        pool,
        broker,
        embedder,
        index,
        llm,
    ));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr: SocketAddr = settings
        .http_addr
        .parse()
        .with_context(|| format!("bad bind address {:?}", settings.http_addr))?;
    info!("cortex-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
