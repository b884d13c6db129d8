//! Retrieval-augmented search: embed the query, fetch nearest chunks,
//! generate an answer over them.

use std::sync::Arc;

use cortex_schemas::SearchResult;
use cortex_services::{Embedder, Llm, VectorIndex};

use crate::AppError;

pub struct SearchService {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    llm: Arc<dyn Llm>,
}

impl SearchService {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, llm: Arc<dyn Llm>) -> Self {
        Self {
            embedder,
            index,
            llm,
        }
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<(String, Vec<SearchResult>), AppError> {
        let query_vector = self.embedder.embed(query).await?;
        let points = self.index.query(&query_vector, limit).await?;

        let mut contexts = Vec::with_capacity(points.len());
        let mut results = Vec::with_capacity(points.len());
        for point in points {
            contexts.push(point.payload.text.clone());
            results.push(SearchResult {
                text: point.payload.text,
                score: point.score,
                document_id: point.payload.document_id,
                chunk_index: point.payload.chunk_index,
            });
        }

        let answer = self.llm.generate_answer(query, &contexts).await?;
        Ok((answer, results))
    }
}
