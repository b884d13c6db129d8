//! Vector index capability: in-memory cosine index + Qdrant REST client.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use cortex_schemas::ChunkPayload;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::ServiceError;

pub const COLLECTION_NAME: &str = "documents";

/// Deterministic point id for `(document_id, chunk_index)`.
///
/// UUIDv5 over the DNS namespace, so re-processing a document upserts the
/// same ids instead of accumulating duplicates.
pub fn chunk_point_id(document_id: Uuid, chunk_index: usize) -> Uuid {
    let data = format!("{document_id}_{chunk_index}");
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, data.as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub score: f32,
    pub payload: ChunkPayload,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if missing. Idempotent; called once at startup.
    async fn ensure_collection(&self) -> Result<(), ServiceError>;

    async fn upsert(&self, points: Vec<Point>) -> Result<(), ServiceError>;

    /// Nearest neighbours by cosine similarity, best first.
    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>, ServiceError>;

    /// Connectivity probe for readiness checks.
    async fn ping(&self) -> Result<(), ServiceError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Process-local index. Upserts replace by point id, exactly like the real
/// store, so idempotency properties can be asserted without infrastructure.
#[derive(Default)]
pub struct MemoryIndex {
    points: Mutex<HashMap<Uuid, (Vec<f32>, ChunkPayload)>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Points stored for one document (test assertions).
    pub fn points_for(&self, document_id: Uuid) -> usize {
        self.points
            .lock()
            .map(|p| {
                p.values()
                    .filter(|(_, payload)| payload.document_id == document_id)
                    .count()
            })
            .unwrap_or(0)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_collection(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn upsert(&self, points: Vec<Point>) -> Result<(), ServiceError> {
        let mut map = self
            .points
            .lock()
            .map_err(|_| ServiceError::VectorIndex("index lock poisoned".to_string()))?;
        for p in points {
            map.insert(p.id, (p.vector, p.payload));
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>, ServiceError> {
        let map = self
            .points
            .lock()
            .map_err(|_| ServiceError::VectorIndex("index lock poisoned".to_string()))?;

        let mut scored: Vec<ScoredPoint> = map
            .values()
            .map(|(v, payload)| ScoredPoint {
                score: cosine(vector, v),
                payload: payload.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn ping(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Qdrant REST implementation
// ---------------------------------------------------------------------------

/// Minimal Qdrant client over its HTTP API: collection bootstrap, point
/// upsert, nearest-neighbour query.
pub struct QdrantIndex {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    dim: usize,
}

impl QdrantIndex {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>, dim: usize) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            dim,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }
        req
    }
}

#[derive(Deserialize)]
struct QdrantQueryResponse {
    result: QdrantQueryResult,
}

#[derive(Deserialize)]
struct QdrantQueryResult {
    points: Vec<QdrantScoredPoint>,
}

#[derive(Deserialize)]
struct QdrantScoredPoint {
    score: f32,
    payload: Option<ChunkPayload>,
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self) -> Result<(), ServiceError> {
        let exists = self
            .request(reqwest::Method::GET, &format!("/collections/{COLLECTION_NAME}"))
            .send()
            .await
            .map_err(|e| ServiceError::VectorIndex(format!("transport: {e}")))?
            .status()
            .is_success();

        if exists {
            return Ok(());
        }

        let resp = self
            .request(reqwest::Method::PUT, &format!("/collections/{COLLECTION_NAME}"))
            .json(&json!({
                "vectors": { "size": self.dim, "distance": "Cosine" }
            }))
            .send()
            .await
            .map_err(|e| ServiceError::VectorIndex(format!("transport: {e}")))?;

        if !resp.status().is_success() {
            return Err(ServiceError::VectorIndex(format!(
                "create collection status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn upsert(&self, points: Vec<Point>) -> Result<(), ServiceError> {
        if points.is_empty() {
            return Ok(());
        }

        let body: Vec<serde_json::Value> = points
            .iter()
            .map(|p| {
                json!({
                    "id": p.id,
                    "vector": p.vector,
                    "payload": p.payload,
                })
            })
            .collect();

        let resp = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{COLLECTION_NAME}/points?wait=true"),
            )
            .json(&json!({ "points": body }))
            .send()
            .await
            .map_err(|e| ServiceError::VectorIndex(format!("transport: {e}")))?;

        if !resp.status().is_success() {
            return Err(ServiceError::VectorIndex(format!(
                "upsert status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>, ServiceError> {
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{COLLECTION_NAME}/points/query"),
            )
            .json(&json!({
                "query": vector,
                "limit": limit,
                "with_payload": true,
            }))
            .send()
            .await
            .map_err(|e| ServiceError::VectorIndex(format!("transport: {e}")))?;

        if !resp.status().is_success() {
            return Err(ServiceError::VectorIndex(format!(
                "query status {}",
                resp.status()
            )));
        }

        let body: QdrantQueryResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::VectorIndex(format!("decode: {e}")))?;

        Ok(body
            .result
            .points
            .into_iter()
            .filter_map(|p| {
                p.payload.map(|payload| ScoredPoint {
                    score: p.score,
                    payload,
                })
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), ServiceError> {
        let resp = self
            .request(reqwest::Method::GET, "/collections")
            .send()
            .await
            .map_err(|e| ServiceError::VectorIndex(format!("transport: {e}")))?;

        if !resp.status().is_success() {
            return Err(ServiceError::VectorIndex(format!(
                "status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
