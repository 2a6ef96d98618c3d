//! Vector database abstraction.
//!
//! The [`VectorStore`] trait is the narrow interface the vector index uses
//! to persist and search embeddings, keyed by a collection name. Backends
//! may be local ([`memory::InMemoryVectorStore`]) or network-addressable
//! (the Milvus client in the application crate).
//!
//! Implementations perform one attempt per call and report failures as
//! [`ProviderError`] so callers can apply the same retry policy as for
//! model calls.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;

/// A single vector to write.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Value,
}

/// Abstract vector database.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_collection`](VectorStore::ensure_collection) | Create the named collection if missing |
/// | [`upsert`](VectorStore::upsert) | Insert or replace one vector |
/// | [`upsert_batch`](VectorStore::upsert_batch) | Insert or replace many vectors |
/// | [`search`](VectorStore::search) | Top-k nearest neighbours by cosine similarity |
/// | [`drop_collection`](VectorStore::drop_collection) | Delete the named collection |
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<(), ProviderError>;

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: &[f32],
        metadata: Value,
    ) -> Result<(), ProviderError>;

    /// Write many records. The default issues one [`upsert`](VectorStore::upsert) per record.
    async fn upsert_batch(&self, collection: &str, records: &[VectorRecord]) -> Result<(), ProviderError> {
        for r in records {
            self.upsert(collection, &r.id, &r.vector, r.metadata.clone()).await?;
        }
        Ok(())
    }

    /// Return up to `top_k` `(id, score)` pairs, best first. Scores are
    /// cosine similarities.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(String, f32)>, ProviderError>;

    async fn drop_collection(&self, collection: &str) -> Result<(), ProviderError>;
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors
/// of different lengths, or zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
