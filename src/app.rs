//! Component wiring.
//!
//! [`App`] owns one of each core component, built from [`Config`]:
//!
//! | Config | Component |
//! |--------|-----------|
//! | `[provider] kind` | `openai` → [`OpenAiProvider`], `local` → `LocalProvider`, `disabled` → [`DisabledProvider`] |
//! | `[vector_store] kind` | `memory` → `InMemoryVectorStore`, `milvus` → [`MilvusStore`] |
//! | `[rerank] kind` | `none`, `local` → `LocalReranker` |

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use docroute_core::agent::Agent;
use docroute_core::provider::{AgentAction, ChatMessage, LabeledOption, Provider, Reranker, ToolSpec};
use docroute_core::retrieval::RetrievalEngine;
use docroute_core::router::{RetrievalTool, Router};
use docroute_core::store::memory::InMemoryVectorStore;
use docroute_core::store::VectorStore;
use docroute_core::{Catalog, ProviderError};

use crate::config::Config;
use crate::milvus::MilvusStore;
use crate::openai::OpenAiProvider;

/// Provider used when `provider.kind = "disabled"`. Every call fails.
pub struct DisabledProvider;

#[async_trait]
impl Provider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Fatal("provider is disabled".into()))
    }

    async fn complete(&self, _prompt: &str, _context: &[String]) -> Result<String, ProviderError> {
        Err(ProviderError::Fatal("provider is disabled".into()))
    }

    async fn classify(&self, _prompt: &str, _options: &[LabeledOption]) -> Result<String, ProviderError> {
        Err(ProviderError::Fatal("provider is disabled".into()))
    }

    async fn chat(&self, _messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<AgentAction, ProviderError> {
        Err(ProviderError::Fatal("provider is disabled".into()))
    }
}

/// Shared application components.
#[derive(Clone)]
pub struct App {
    pub config: Arc<Config>,
    pub catalog: Arc<Catalog>,
    pub engine: Arc<RetrievalEngine>,
    pub router: Arc<Router>,
    pub agent: Arc<Agent>,
}

impl App {
    /// Build every backend named in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = create_provider(config)?;
        let store = create_store(config)?;
        let reranker = create_reranker(config)?;
        Ok(Self::with_components(config.clone(), provider, store, reranker))
    }

    /// Assemble from already-built backends.
    pub fn with_components(
        config: Config,
        provider: Arc<dyn Provider>,
        store: Arc<dyn VectorStore>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> Self {
        let rag = config.rag();
        let catalog = Arc::new(Catalog::new(provider.clone(), store, rag.clone()));
        let engine = Arc::new(RetrievalEngine::new(provider.clone(), reranker, &rag));
        let router = Arc::new(Router::new(
            provider.clone(),
            catalog.clone(),
            engine.clone(),
            config.retrieval.default_tool.clone(),
        ));
        let agent = Arc::new(Agent::new(provider, catalog.clone(), engine.clone(), config.agent()));
        Self {
            config: Arc::new(config),
            catalog,
            engine,
            router,
            agent,
        }
    }

    /// Summary and vector tools for `collection`, in that order.
    pub fn router_tools(&self, collection: &str) -> Vec<RetrievalTool> {
        let retrieval = &self.config.retrieval;
        vec![
            RetrievalTool::summary(collection),
            RetrievalTool::vector(collection, retrieval.top_k, self.rerank_top_n()),
        ]
    }

    /// Rerank depth, or `None` when there is nothing to narrow with.
    pub fn rerank_top_n(&self) -> Option<usize> {
        if self.engine.has_reranker() {
            self.config.retrieval.rerank_top_n
        } else {
            None
        }
    }
}

pub fn create_provider(config: &Config) -> Result<Arc<dyn Provider>> {
    match config.provider.kind.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(&config.provider)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => {
            let chat = OpenAiProvider::new(&config.provider)?;
            Ok(Arc::new(crate::local::LocalProvider::new(&config.provider, chat)?))
        }
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("provider.kind = \"local\" requires building with --features local-embeddings"),
        "disabled" => Ok(Arc::new(DisabledProvider)),
        other => bail!("Unknown provider kind: {}", other),
    }
}

pub fn create_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    match config.vector_store.kind.as_str() {
        "memory" => Ok(Arc::new(InMemoryVectorStore::new())),
        "milvus" => Ok(Arc::new(MilvusStore::new(
            &config.vector_store,
            config.provider.retry_policy().timeout,
        )?)),
        other => bail!("Unknown vector_store kind: {}", other),
    }
}

pub fn create_reranker(config: &Config) -> Result<Option<Arc<dyn Reranker>>> {
    match config.rerank.kind.as_str() {
        "none" => Ok(None),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Some(Arc::new(crate::local::LocalReranker::new(&config.rerank)?))),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("rerank.kind = \"local\" requires building with --features local-embeddings"),
        other => bail!("Unknown rerank kind: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use docroute_core::testing::{KeywordReranker, ScriptedProvider};

    #[test]
    fn test_memory_store_and_disabled_provider_build() {
        let config = parse_config("[provider]\nkind = \"disabled\"\n").unwrap();
        let app = App::from_config(&config).unwrap();
        assert_eq!(app.router_tools("docs").len(), 2);
    }

    #[test]
    fn test_rerank_depth_only_with_reranker() {
        let config = Config::default();
        let plain = App::with_components(
            config.clone(),
            Arc::new(ScriptedProvider::new()),
            Arc::new(InMemoryVectorStore::new()),
            None,
        );
        assert_eq!(plain.rerank_top_n(), None);

        let reranked = App::with_components(
            config,
            Arc::new(ScriptedProvider::new()),
            Arc::new(InMemoryVectorStore::new()),
            Some(Arc::new(KeywordReranker)),
        );
        assert_eq!(reranked.rerank_top_n(), Some(3));
        let tools = reranked.router_tools("docs");
        assert_eq!(tools[1].name, "search_docs");
    }

    #[tokio::test]
    async fn test_disabled_provider_fails_every_call() {
        let provider = DisabledProvider;
        assert!(provider.embed(&["x".into()]).await.is_err());
        assert!(provider.complete("p", &[]).await.is_err());
    }
}
