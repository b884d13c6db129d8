//! External-collaborator implementations: chunking, embeddings, vector
//! index, answer generation, file store.
//!
//! Each capability is a dyn-safe trait with two implementers — a
//! deterministic in-process one (the default when no API key is configured,
//! and the backbone of the test suite) and an HTTP-backed production one.

use std::fmt;

pub mod chunking;
pub mod embed;
pub mod file_store;
pub mod llm;
pub mod vector;
pub mod wiring;

pub use chunking::chunk_text;
pub use embed::{Embedder, MockEmbedder, OpenAiEmbedder};
pub use file_store::FileStore;
pub use llm::{Llm, MockLlm, OpenAiLlm};
pub use vector::{chunk_point_id, MemoryIndex, Point, QdrantIndex, ScoredPoint, VectorIndex};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors an external collaborator may return.
#[derive(Debug)]
pub enum ServiceError {
    Embedder(String),
    VectorIndex(String),
    Llm(String),
    FileIo(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Embedder(msg) => write!(f, "embedder error: {msg}"),
            ServiceError::VectorIndex(msg) => write!(f, "vector index error: {msg}"),
            ServiceError::Llm(msg) => write!(f, "llm error: {msg}"),
            ServiceError::FileIo(msg) => write!(f, "file i/o error: {msg}"),
        }
    }
}

impl std::error::Error for ServiceError {}
