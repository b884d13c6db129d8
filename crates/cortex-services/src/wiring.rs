//! Production wiring: pick mock or HTTP-backed implementations from the
//! configured credentials. Both binaries (daemon, worker) go through here so
//! they agree on the choice.

use std::sync::Arc;

use cortex_config::Settings;

use crate::{
    Embedder, Llm, MemoryIndex, MockEmbedder, MockLlm, OpenAiEmbedder, OpenAiLlm, QdrantIndex,
    VectorIndex,
};

pub fn build_embedder(settings: &Settings, client: &reqwest::Client) -> Arc<dyn Embedder> {
    match &settings.openai_api_key {
        Some(key) => Arc::new(OpenAiEmbedder::new(
            client.clone(),
            &settings.openai_base_url,
            key,
            &settings.embedding_model,
            settings.embedding_dim,
        )),
        None => Arc::new(MockEmbedder::new(settings.embedding_dim)),
    }
}

pub fn build_llm(settings: &Settings, client: &reqwest::Client) -> Arc<dyn Llm> {
    match &settings.openai_api_key {
        Some(key) => Arc::new(OpenAiLlm::new(
            client.clone(),
            &settings.openai_base_url,
            key,
            &settings.llm_model,
        )),
        None => Arc::new(MockLlm::new()),
    }
}

/// The vector index is always the external one in production; the in-memory
/// index exists for in-process wiring (tests, demos without a Qdrant).
pub fn build_vector_index(settings: &Settings, client: &reqwest::Client) -> Arc<dyn VectorIndex> {
    if settings.qdrant_url.is_empty() {
        Arc::new(MemoryIndex::new())
    } else {
        Arc::new(QdrantIndex::new(
            client.clone(),
            &settings.qdrant_url,
            settings.qdrant_api_key.clone(),
            settings.embedding_dim,
        ))
    }
}
