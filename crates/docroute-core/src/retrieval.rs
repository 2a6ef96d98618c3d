//! Retrieve, rerank, synthesize.
//!
//! # Pipeline
//!
//! ```text
//! query ─▶ VectorIndex::query(top_k) ─▶ similarity cutoff ─▶ rerank(top_n) ─▶ synthesize
//! ```
//!
//! Synthesis hands the provider only the selected chunks, in rank order,
//! with a prompt that forbids answering from outside them. When nothing
//! survives the cutoff the provider is not called at all.

use std::sync::Arc;

use crate::config::RagConfig;
use crate::error::{Operation, ProviderError, RagError};
use crate::index::VectorIndex;
use crate::models::{rank_order, Answer, ScoredChunk};
use crate::provider::{call_with_retry, Provider, Reranker, RetryPolicy};

/// Returned when no chunk qualifies as context.
pub const NO_CONTEXT_ANSWER: &str = "No relevant context was found in the collection for this query.";

const SYNTHESIS_PROMPT: &str = "Context information is provided as the passages above, in order of relevance. \
Given only this context information and not prior knowledge, answer the query. \
If the context does not contain the answer, say so.\nQuery: ";

/// Answers queries over a [`VectorIndex`].
pub struct RetrievalEngine {
    provider: Arc<dyn Provider>,
    reranker: Option<Arc<dyn Reranker>>,
    retry: RetryPolicy,
    similarity_cutoff: Option<f32>,
}

impl RetrievalEngine {
    pub fn new(provider: Arc<dyn Provider>, reranker: Option<Arc<dyn Reranker>>, config: &RagConfig) -> Self {
        Self {
            provider,
            reranker,
            retry: config.retry.clone(),
            similarity_cutoff: config.similarity_cutoff,
        }
    }

    pub fn has_reranker(&self) -> bool {
        self.reranker.is_some()
    }

    /// Full pipeline. `rerank_top_n = None` skips narrowing.
    pub async fn answer(
        &self,
        query: &str,
        index: &VectorIndex,
        top_k: usize,
        rerank_top_n: Option<usize>,
    ) -> Result<Answer, RagError> {
        let candidates = self.retrieve(query, index, top_k).await?;
        let selected = match rerank_top_n {
            Some(n) => self.rerank(query, &index.collection().name, candidates, n).await?,
            None => candidates,
        };
        self.synthesize(query, &index.collection().name, selected).await
    }

    /// Top-k candidates with the similarity cutoff applied.
    pub async fn retrieve(&self, query: &str, index: &VectorIndex, top_k: usize) -> Result<Vec<ScoredChunk>, RagError> {
        let mut hits = index.query(query, top_k).await?;
        if let Some(cutoff) = self.similarity_cutoff {
            let before = hits.len();
            hits.retain(|h| h.score >= cutoff);
            if hits.len() < before {
                tracing::debug!(
                    collection = %index.collection().name,
                    cutoff,
                    dropped = before - hits.len(),
                    "similarity cutoff applied"
                );
            }
        }
        Ok(hits)
    }

    /// Narrow `candidates` to `top_n`.
    ///
    /// With a reranker, candidates are re-scored and re-sorted (equal
    /// scores keep collection order). Without one, the vector order is
    /// kept and simply truncated.
    pub async fn rerank(
        &self,
        query: &str,
        collection: &str,
        mut candidates: Vec<ScoredChunk>,
        top_n: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        let Some(reranker) = &self.reranker else {
            candidates.truncate(top_n);
            return Ok(candidates);
        };
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let texts: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
        let scores = call_with_retry(&self.retry, Operation::Query, collection, || reranker.rerank(query, &texts)).await?;
        if scores.len() != candidates.len() {
            return Err(RagError::Provider {
                op: Operation::Query,
                collection: collection.to_string(),
                attempts: 1,
                source: ProviderError::Malformed(format!(
                    "reranker returned {} scores for {} candidates",
                    scores.len(),
                    candidates.len()
                )),
            });
        }

        for (candidate, score) in candidates.iter_mut().zip(scores) {
            candidate.score = score;
        }
        candidates.sort_by(rank_order);
        candidates.truncate(top_n);
        tracing::debug!(
            collection,
            reranker = reranker.model_name(),
            kept = candidates.len(),
            "candidates reranked"
        );
        Ok(candidates)
    }

    /// Ask the provider to answer from `sources` only.
    pub async fn synthesize(&self, query: &str, collection: &str, sources: Vec<ScoredChunk>) -> Result<Answer, RagError> {
        if sources.is_empty() {
            return Ok(Answer {
                text: NO_CONTEXT_ANSWER.to_string(),
                sources,
            });
        }
        let prompt = format!("{}{}", SYNTHESIS_PROMPT, query);
        let context: Vec<String> = sources.iter().map(|s| s.chunk.text.clone()).collect();
        let text = call_with_retry(&self.retry, Operation::Query, collection, || {
            self.provider.complete(&prompt, &context)
        })
        .await?;
        Ok(Answer { text, sources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryVectorStore;
    use crate::testing::{KeywordReranker, ScriptedProvider};
    use crate::Catalog;

    async fn catalog_with(provider: Arc<ScriptedProvider>, config: RagConfig) -> Catalog {
        let catalog = Catalog::new(provider, Arc::new(InMemoryVectorStore::new()), config);
        catalog
            .ingest_text(
                "docs",
                [
                    ("a", "Rust ownership rules."),
                    ("b", "Cats sleep all day."),
                    ("c", "Borrowing rules in Rust."),
                ],
            )
            .await
            .unwrap();
        catalog
    }

    #[tokio::test]
    async fn test_answer_uses_sources_in_rank_order() {
        let provider = Arc::new(ScriptedProvider::new());
        let catalog = catalog_with(provider.clone(), RagConfig::for_tests()).await;
        let engine = RetrievalEngine::new(provider.clone(), None, &RagConfig::for_tests());
        let guard = catalog.read(Operation::Query, "docs").await.unwrap();

        let answer = engine.answer("rust rules", guard.vector(), 2, None).await.unwrap();
        assert_eq!(answer.sources.len(), 2);
        assert!(answer.sources[0].score >= answer.sources[1].score);
        let expected = format!(
            "answer({} | {})",
            answer.sources[0].chunk.text, answer.sources[1].chunk.text
        );
        assert_eq!(answer.text, expected);
        assert_eq!(provider.complete_calls(), 1);
    }

    #[tokio::test]
    async fn test_rerank_narrows_and_reorders() {
        let provider = Arc::new(ScriptedProvider::new());
        let catalog = catalog_with(provider.clone(), RagConfig::for_tests()).await;
        let engine = RetrievalEngine::new(provider, Some(Arc::new(KeywordReranker)), &RagConfig::for_tests());
        let guard = catalog.read(Operation::Query, "docs").await.unwrap();

        let answer = engine.answer("borrowing rust", guard.vector(), 3, Some(1)).await.unwrap();
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].chunk.text, "Borrowing rules in Rust.");
        assert_eq!(answer.sources[0].score, 2.0);
    }

    #[tokio::test]
    async fn test_rerank_without_reranker_truncates() {
        let provider = Arc::new(ScriptedProvider::new());
        let engine = RetrievalEngine::new(provider, None, &RagConfig::for_tests());
        let catalog = catalog_with(Arc::new(ScriptedProvider::new()), RagConfig::for_tests()).await;
        let guard = catalog.read(Operation::Query, "docs").await.unwrap();
        let candidates = engine.retrieve("rust", guard.vector(), 3).await.unwrap();
        let first = candidates[0].chunk.id.clone();
        let kept = engine.rerank("rust", "docs", candidates, 1).await.unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].chunk.id, first);
    }

    #[tokio::test]
    async fn test_cutoff_leaves_no_context_without_provider_call() {
        let provider = Arc::new(ScriptedProvider::new());
        let mut config = RagConfig::for_tests();
        config.similarity_cutoff = Some(1.5);
        let catalog = catalog_with(provider.clone(), config.clone()).await;
        let engine = RetrievalEngine::new(provider.clone(), None, &config);
        let guard = catalog.read(Operation::Query, "docs").await.unwrap();

        let answer = engine.answer("rust", guard.vector(), 3, None).await.unwrap();
        assert!(answer.sources.is_empty());
        assert_eq!(answer.text, NO_CONTEXT_ANSWER);
        assert_eq!(provider.complete_calls(), 0);
    }
}
