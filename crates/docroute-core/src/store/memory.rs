//! In-memory [`VectorStore`] for tests, the CLI, and single-process use.
//!
//! Collections are `Vec`s behind a `std::sync::RwLock`. Search is
//! brute-force cosine similarity; equal scores keep insertion order.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use super::{cosine_similarity, VectorStore};
use crate::error::ProviderError;

struct StoredVector {
    id: String,
    vector: Vec<f32>,
}

struct StoredCollection {
    dims: usize,
    vectors: Vec<StoredVector>,
}

/// In-memory vector store.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, StoredCollection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Names of the collections currently held, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Number of vectors stored in `collection` (0 if it does not exist).
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .ok()
            .and_then(|c| c.get(collection).map(|sc| sc.vectors.len()))
            .unwrap_or(0)
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> ProviderError {
    ProviderError::Fatal("in-memory vector store lock poisoned".to_string())
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<(), ProviderError> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        collections
            .entry(collection.to_string())
            .or_insert_with(|| StoredCollection {
                dims,
                vectors: Vec::new(),
            });
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: &[f32],
        _metadata: Value,
    ) -> Result<(), ProviderError> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| ProviderError::Fatal(format!("collection not found: {}", collection)))?;
        if stored.dims != vector.len() {
            return Err(ProviderError::Fatal(format!(
                "dimension mismatch for {}: expected {}, got {}",
                collection,
                stored.dims,
                vector.len()
            )));
        }
        match stored.vectors.iter_mut().find(|sv| sv.id == id) {
            Some(existing) => {
                existing.vector = vector.to_vec();
            }
            None => stored.vectors.push(StoredVector {
                id: id.to_string(),
                vector: vector.to_vec(),
            }),
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(String, f32)>, ProviderError> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        let stored = collections
            .get(collection)
            .ok_or_else(|| ProviderError::Fatal(format!("collection not found: {}", collection)))?;
        let mut hits: Vec<(String, f32)> = stored
            .vectors
            .iter()
            .map(|sv| (sv.id.clone(), cosine_similarity(vector, &sv.vector)))
            .collect();
        // Stable sort keeps insertion order among equal scores.
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), ProviderError> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        collections.remove(collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("c", 2).await.unwrap();
        store.upsert("c", "a", &[1.0, 0.0], json!({})).await.unwrap();
        store.upsert("c", "b", &[0.0, 1.0], json!({})).await.unwrap();
        store.upsert("c", "c", &[0.7, 0.7], json!({})).await.unwrap();

        let hits = store.search("c", &[1.0, 0.1], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "a");
        assert_eq!(hits[1].0, "c");
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_id() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("c", 2).await.unwrap();
        store.upsert("c", "a", &[1.0, 0.0], json!({})).await.unwrap();
        store.upsert("c", "a", &[0.0, 1.0], json!({})).await.unwrap();
        assert_eq!(store.len("c"), 1);
        let hits = store.search("c", &[0.0, 1.0], 5).await.unwrap();
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("c", 3).await.unwrap();
        let err = store.upsert("c", "a", &[1.0], json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_drop_and_missing_collection() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("c", 1).await.unwrap();
        store.drop_collection("c").await.unwrap();
        assert!(store.collection_names().is_empty());
        assert!(store.search("c", &[1.0], 1).await.is_err());
    }
}
