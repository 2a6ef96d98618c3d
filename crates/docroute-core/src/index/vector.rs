//! Similarity index backed by a [`VectorStore`].
//!
//! Each build writes into its own physical store collection (see
//! [`VectorIndex::build`]), so a rebuild never touches vectors a reader may
//! still be searching.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::json;

use crate::config::RagConfig;
use crate::error::{Operation, ProviderError, RagError};
use crate::models::{rank_order, Collection, ScoredChunk};
use crate::provider::{call_with_retry, Provider, RetryPolicy};
use crate::store::{VectorRecord, VectorStore};

/// Records written per store request.
const UPSERT_BATCH: usize = 256;

/// Top-k similarity search over one collection generation.
pub struct VectorIndex {
    collection: Arc<Collection>,
    physical: String,
    dims: usize,
    by_id: HashMap<String, usize>,
    provider: Arc<dyn Provider>,
    store: Arc<dyn VectorStore>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("collection", &self.collection.name)
            .field("physical", &self.physical)
            .field("dims", &self.dims)
            .finish()
    }
}

impl VectorIndex {
    /// Embed every chunk of `collection` and write the vectors to `physical`.
    ///
    /// Chunks that already carry an embedding are not sent to the provider.
    /// Embedding batches run concurrently, at most `config.workers` at a
    /// time. On success the returned index owns `collection` with its
    /// `dims` set to the embedding dimensionality. On failure the partially
    /// written physical collection is dropped.
    pub async fn build(
        mut collection: Collection,
        physical: String,
        provider: Arc<dyn Provider>,
        store: Arc<dyn VectorStore>,
        config: &RagConfig,
    ) -> Result<Self, RagError> {
        let name = collection.name.clone();
        if collection.chunks.is_empty() {
            return Err(RagError::empty_index(Operation::Build, &name));
        }

        let vectors = embed_chunks(&collection, provider.as_ref(), config).await?;
        let dims = vectors[0].len();
        if dims == 0 || vectors.iter().any(|v| v.len() != dims) {
            return Err(RagError::Provider {
                op: Operation::Build,
                collection: name,
                attempts: 1,
                source: ProviderError::Malformed("embeddings have inconsistent dimensionality".into()),
            });
        }

        let records: Vec<VectorRecord> = collection
            .chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord {
                id: chunk.id.clone(),
                vector,
                metadata: json!({
                    "collection": name,
                    "document_id": chunk.document_id,
                    "chunk_index": chunk.chunk_index,
                    "position": chunk.position,
                }),
            })
            .collect();

        if let Err(e) = write_records(store.as_ref(), &physical, dims, &records, &config.retry, &name).await {
            let _ = store.drop_collection(&physical).await;
            return Err(e);
        }

        collection.dims = dims;
        let by_id = collection
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();

        tracing::info!(
            collection = %name,
            physical = %physical,
            chunks = records.len(),
            dims,
            "vector index built"
        );

        Ok(Self {
            collection: Arc::new(collection),
            physical,
            dims,
            by_id,
            provider,
            store,
            retry: config.retry.clone(),
        })
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    /// Store-side collection this generation lives in.
    pub fn physical_name(&self) -> &str {
        &self.physical
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Return the `top_k` chunks most similar to `text`.
    ///
    /// Ordered by descending score; equal scores keep collection order.
    /// With `top_k >= chunk_count` every chunk is returned exactly once.
    pub async fn query(&self, text: &str, top_k: usize) -> Result<Vec<ScoredChunk>, RagError> {
        let name = &self.collection.name;
        if self.collection.chunks.is_empty() {
            return Err(RagError::empty_index(Operation::Query, name));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query = [text.to_string()];
        let mut embedded = call_with_retry(&self.retry, Operation::Query, name, || {
            self.provider.embed(&query)
        })
        .await?;
        let query_vec = match embedded.pop() {
            Some(v) if v.len() == self.dims => v,
            _ => {
                return Err(RagError::Provider {
                    op: Operation::Query,
                    collection: name.clone(),
                    attempts: 1,
                    source: ProviderError::Malformed("query embedding missing or wrong size".into()),
                })
            }
        };

        let limit = top_k.min(self.collection.chunk_count());
        let hits = call_with_retry(&self.retry, Operation::Query, name, || {
            self.store.search(&self.physical, &query_vec, limit)
        })
        .await
        .map_err(as_store_error)?;

        let mut results: Vec<ScoredChunk> = hits
            .into_iter()
            .filter_map(|(id, score)| match self.by_id.get(&id) {
                Some(&i) => Some(ScoredChunk {
                    chunk: self.collection.chunks[i].clone(),
                    score,
                }),
                None => {
                    tracing::warn!(collection = %name, id = %id, "search returned an unknown chunk id");
                    None
                }
            })
            .collect();
        results.sort_by(rank_order);
        results.truncate(limit);
        Ok(results)
    }

    /// Drop this generation's vectors from the store. Failures are logged.
    pub async fn discard(&self) {
        match self.store.drop_collection(&self.physical).await {
            Ok(()) => tracing::debug!(physical = %self.physical, "vector generation dropped"),
            Err(e) => tracing::warn!(physical = %self.physical, error = %e, "failed to drop vector generation"),
        }
    }
}

/// Embed chunks lacking a precomputed vector, preserving chunk order.
async fn embed_chunks(
    collection: &Collection,
    provider: &dyn Provider,
    config: &RagConfig,
) -> Result<Vec<Vec<f32>>, RagError> {
    let name = collection.name.as_str();
    let pending: Vec<usize> = collection
        .chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.embedding.is_none())
        .map(|(i, _)| i)
        .collect();

    let batches: Vec<Vec<usize>> = pending
        .chunks(config.embed_batch_size.max(1))
        .map(|b| b.to_vec())
        .collect();

    let embedded: Vec<(Vec<usize>, Vec<Vec<f32>>)> = stream::iter(batches)
        .map(|batch| async move {
            let texts: Vec<String> = batch
                .iter()
                .map(|&i| collection.chunks[i].text.clone())
                .collect();
            let vectors = call_with_retry(&config.retry, Operation::Build, name, || provider.embed(&texts)).await?;
            if vectors.len() != texts.len() {
                return Err(RagError::Provider {
                    op: Operation::Build,
                    collection: name.to_string(),
                    attempts: 1,
                    source: ProviderError::Malformed(format!(
                        "expected {} embeddings, got {}",
                        texts.len(),
                        vectors.len()
                    )),
                });
            }
            Ok((batch, vectors))
        })
        .buffered(config.workers.max(1))
        .try_collect()
        .await?;

    let mut out: Vec<Option<Vec<f32>>> = collection.chunks.iter().map(|c| c.embedding.clone()).collect();
    for (batch, vectors) in embedded {
        for (i, v) in batch.into_iter().zip(vectors) {
            out[i] = Some(v);
        }
    }
    Ok(out.into_iter().map(Option::unwrap_or_default).collect())
}

async fn write_records(
    store: &dyn VectorStore,
    physical: &str,
    dims: usize,
    records: &[VectorRecord],
    retry: &RetryPolicy,
    collection: &str,
) -> Result<(), RagError> {
    call_with_retry(retry, Operation::Build, collection, || store.ensure_collection(physical, dims))
        .await
        .map_err(as_store_error)?;
    for batch in records.chunks(UPSERT_BATCH) {
        call_with_retry(retry, Operation::Build, collection, || store.upsert_batch(physical, batch))
            .await
            .map_err(as_store_error)?;
    }
    Ok(())
}

/// Re-label an exhausted retry against the vector store.
fn as_store_error(err: RagError) -> RagError {
    match err {
        RagError::Provider {
            op,
            collection,
            source,
            ..
        } => RagError::Store {
            op,
            collection,
            source,
        },
        other => other,
    }
}
