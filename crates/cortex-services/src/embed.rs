//! Embedding capability: deterministic mock + OpenAI-compatible HTTP client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ServiceError;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Output dimensionality; must match the vector index collection.
    fn dim(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;

    /// Batch form used by the processor; one vector per input, same order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;
}

// ---------------------------------------------------------------------------
// Mock
// ---------------------------------------------------------------------------

/// Deterministic pseudo-embeddings derived from the input length.
///
/// Real embeddings add cost and rate limits that get in the way of pipeline
/// testing; what matters here is stable output for a given input so
/// idempotent re-processing can be asserted.
pub struct MockEmbedder {
    dim: usize,
}

impl MockEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let mut state = text.len() as u64 + 1;
        let mut out = Vec::with_capacity(self.dim);
        for _ in 0..self.dim {
            // splitmix64 step
            state = state.wrapping_add(0x9e3779b97f4a7c15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
            z ^= z >> 31;
            out.push((z >> 40) as f32 / (1u64 << 24) as f32);
        }
        Ok(out)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP client
// ---------------------------------------------------------------------------

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dim: usize,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsDatum>,
}

#[derive(Deserialize)]
struct EmbeddingsDatum {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: &str,
        model: &str,
        dim: usize,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            dim,
        }
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingsRequest {
                model: &self.model,
                input,
            })
            .send()
            .await
            .map_err(|e| ServiceError::Embedder(format!("transport: {e}")))?;

        if !resp.status().is_success() {
            return Err(ServiceError::Embedder(format!(
                "api status {}",
                resp.status()
            )));
        }

        let body: EmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::Embedder(format!("decode: {e}")))?;

        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ServiceError::Embedder("empty response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.request(texts).await?;
        if vectors.len() != texts.len() {
            return Err(ServiceError::Embedder(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}
