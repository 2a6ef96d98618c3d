//! Core data models that flow through ingestion and retrieval.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Raw source document as handed to ingestion. Immutable once ingested.
#[derive(Debug, Clone)]
pub struct Document {
    /// Path, file name, or any caller-chosen identifier.
    pub id: String,
    pub content: Vec<u8>,
    /// MIME type, e.g. `text/plain`.
    pub content_type: String,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            content_type: content_type.into(),
        }
    }

    /// Convenience constructor for already-decoded text.
    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, text.into().into_bytes(), "text/plain")
    }
}

/// A contiguous span of a document's text, the unit of embedding and retrieval.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Position within the owning document.
    pub chunk_index: usize,
    /// Position within the collection; breaks score ties.
    pub position: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

/// A named, versioned set of chunks.
///
/// Replaced wholesale on re-ingestion; a `Collection` value itself never
/// changes after construction.
#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    /// Monotonic per name, starting at 1.
    pub version: u64,
    pub chunks: Arc<Vec<Chunk>>,
    pub created_at: DateTime<Utc>,
    /// Embedding dimensionality shared by every chunk in the collection.
    pub dims: usize,
}

impl Collection {
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn info(&self) -> CollectionInfo {
        CollectionInfo {
            name: self.name.clone(),
            version: self.version,
            chunk_count: self.chunk_count(),
            created_at: self.created_at,
            dims: self.dims,
        }
    }
}

/// Serializable summary of a [`Collection`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    pub version: u64,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
    pub dims: usize,
}

/// A chunk with its retrieval (or rerank) score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Synthesized answer plus the chunks it was grounded on, in rank order.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<ScoredChunk>,
}

/// Order by descending score, then ascending collection position.
pub(crate) fn rank_order(a: &ScoredChunk, b: &ScoredChunk) -> std::cmp::Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then(a.chunk.position.cmp(&b.chunk.position))
}
