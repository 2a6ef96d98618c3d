//! Single-tool query routing.
//!
//! A [`Router`] asks the provider to pick exactly one [`RetrievalTool`] for
//! a query, by tool description, then delegates the query to it. Answers
//! from several tools are never blended.
//!
//! # States
//!
//! ```text
//! Received ─▶ Selecting ─▶ Delegating ─▶ Done
//!                 │             ▲
//!                 └─▶ Failed ───┘   (default tool)
//! ```
//!
//! `Failed` covers labels that match no tool and classification calls that
//! error out. Neither reaches the caller: the configured default tool
//! answers instead.

use std::sync::Arc;

use serde::Serialize;

use crate::catalog::Catalog;
use crate::error::{Operation, RagError};
use crate::models::{Answer, ScoredChunk};
use crate::provider::{call_with_retry, LabeledOption, Provider, RetryPolicy};
use crate::retrieval::RetrievalEngine;

pub const SUMMARY_TOOL_DESCRIPTION: &str = "Useful for summarization questions related to your document.";
pub const VECTOR_TOOL_DESCRIPTION: &str = "Useful for retrieving specific context from the document.";

const SELECTION_PROMPT: &str = "Choose the tool best suited to answer the query.\nQuery: ";

/// How a tool answers queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryEngine {
    /// Tree summarization over every chunk.
    Summary { collection: String },
    /// Top-k similarity retrieval, optionally reranked down to `rerank_top_n`.
    Vector {
        collection: String,
        top_k: usize,
        rerank_top_n: Option<usize>,
    },
}

impl QueryEngine {
    pub fn collection(&self) -> &str {
        match self {
            QueryEngine::Summary { collection } | QueryEngine::Vector { collection, .. } => collection,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueryEngine::Summary { .. } => "summary",
            QueryEngine::Vector { .. } => "vector",
        }
    }
}

/// A named query engine with a natural-language description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalTool {
    pub name: String,
    pub description: String,
    pub engine: QueryEngine,
}

impl RetrievalTool {
    /// `summarize_{collection}`, backed by the summary index.
    pub fn summary(collection: &str) -> Self {
        Self {
            name: format!("summarize_{}", collection),
            description: SUMMARY_TOOL_DESCRIPTION.to_string(),
            engine: QueryEngine::Summary {
                collection: collection.to_string(),
            },
        }
    }

    /// `search_{collection}`, backed by the vector index.
    pub fn vector(collection: &str, top_k: usize, rerank_top_n: Option<usize>) -> Self {
        Self {
            name: format!("search_{}", collection),
            description: VECTOR_TOOL_DESCRIPTION.to_string(),
            engine: QueryEngine::Vector {
                collection: collection.to_string(),
                top_k,
                rerank_top_n,
            },
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Answer `query` against the collection's current generation.
    ///
    /// The generation is held for the whole call, so a concurrent
    /// re-ingest cannot swap it out midway.
    pub async fn run(
        &self,
        catalog: &Catalog,
        engine: &RetrievalEngine,
        query: &str,
        op: Operation,
    ) -> Result<Answer, RagError> {
        let guard = catalog.read(op, self.engine.collection()).await?;
        let answer = match &self.engine {
            QueryEngine::Summary { .. } => guard.summary().answer(query).await,
            QueryEngine::Vector {
                top_k, rerank_top_n, ..
            } => engine.answer(query, guard.vector(), *top_k, *rerank_top_n).await,
        };
        answer.map_err(|e| e.within(op))
    }
}

/// Router lifecycle states, recorded in [`RouteResponse::transitions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteState {
    Received,
    Selecting,
    Failed,
    Delegating,
    Done,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteResponse {
    pub text: String,
    /// Name of the tool that produced `text`.
    pub tool: String,
    pub sources: Vec<ScoredChunk>,
    /// True when selection failed and the default tool answered.
    pub fell_back: bool,
    pub transitions: Vec<RouteState>,
}

/// Picks one tool per query and delegates to it.
pub struct Router {
    provider: Arc<dyn Provider>,
    catalog: Arc<Catalog>,
    engine: Arc<RetrievalEngine>,
    retry: RetryPolicy,
    /// Engine kind (`"vector"` or `"summary"`) used when selection fails.
    default_kind: String,
}

impl Router {
    pub fn new(
        provider: Arc<dyn Provider>,
        catalog: Arc<Catalog>,
        engine: Arc<RetrievalEngine>,
        default_kind: impl Into<String>,
    ) -> Self {
        let retry = catalog.config().retry.clone();
        Self {
            provider,
            catalog,
            engine,
            retry,
            default_kind: default_kind.into(),
        }
    }

    /// The fallback tool: first tool of the default kind, else the first tool.
    pub fn default_tool<'a>(&self, tools: &'a [RetrievalTool]) -> Option<&'a RetrievalTool> {
        tools
            .iter()
            .find(|t| t.engine.kind() == self.default_kind)
            .or_else(|| tools.first())
    }

    pub async fn route(&self, query: &str, tools: &[RetrievalTool]) -> Result<RouteResponse, RagError> {
        let mut transitions = vec![RouteState::Received];
        let default = self
            .default_tool(tools)
            .ok_or_else(|| RagError::invalid(Operation::Route, "no tools to route between"))?;

        transitions.push(RouteState::Selecting);
        let selected = self.select(query, tools).await;
        let (tool, fell_back) = match selected {
            Some(tool) => (tool, false),
            None => {
                transitions.push(RouteState::Failed);
                tracing::warn!(fallback = %default.name, "tool selection failed, using default tool");
                (default, true)
            }
        };

        transitions.push(RouteState::Delegating);
        tracing::info!(
            tool = %tool.name,
            engine = tool.engine.kind(),
            collection = tool.engine.collection(),
            fell_back,
            "query routed"
        );
        let answer = tool
            .run(&self.catalog, &self.engine, query, Operation::Route)
            .await?;
        transitions.push(RouteState::Done);

        Ok(RouteResponse {
            text: answer.text,
            tool: tool.name.clone(),
            sources: answer.sources,
            fell_back,
            transitions,
        })
    }

    /// Ask the provider for a tool. `None` means selection failed.
    async fn select<'a>(&self, query: &str, tools: &'a [RetrievalTool]) -> Option<&'a RetrievalTool> {
        let options: Vec<LabeledOption> = tools
            .iter()
            .map(|t| LabeledOption {
                label: t.name.clone(),
                description: t.description.clone(),
            })
            .collect();
        let prompt = format!("{}{}", SELECTION_PROMPT, query);
        let collection = tools.first().map(|t| t.engine.collection()).unwrap_or_default();

        let label = match call_with_retry(&self.retry, Operation::Route, collection, || {
            self.provider.classify(&prompt, &options)
        })
        .await
        {
            Ok(label) => label,
            Err(e) => {
                tracing::warn!(error = %e, "tool classification failed");
                return None;
            }
        };

        let tool = match_label(&label, tools);
        if tool.is_none() {
            tracing::warn!(label = %label, "classifier returned a label matching no tool");
        }
        tool
    }
}

/// Resolve a classifier label: exact name, then case-insensitive name,
/// then a 1-based option number.
fn match_label<'a>(label: &str, tools: &'a [RetrievalTool]) -> Option<&'a RetrievalTool> {
    let label = label.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`');
    if let Some(tool) = tools.iter().find(|t| t.name == label) {
        return Some(tool);
    }
    if let Some(tool) = tools.iter().find(|t| t.name.eq_ignore_ascii_case(label)) {
        return Some(tool);
    }
    match label.parse::<usize>() {
        Ok(n) if n >= 1 => tools.get(n - 1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfig;
    use crate::store::memory::InMemoryVectorStore;
    use crate::testing::ScriptedProvider;

    async fn setup(provider: Arc<ScriptedProvider>) -> Router {
        let config = RagConfig::for_tests();
        let catalog = Arc::new(Catalog::new(
            provider.clone(),
            Arc::new(InMemoryVectorStore::new()),
            config.clone(),
        ));
        catalog
            .ingest_text("docs", [("a", "Ferris is a crab."), ("b", "Crabs walk sideways.")])
            .await
            .unwrap();
        let engine = Arc::new(RetrievalEngine::new(provider.clone(), None, &config));
        Router::new(provider, catalog, engine, "vector")
    }

    fn tools() -> Vec<RetrievalTool> {
        vec![RetrievalTool::summary("docs"), RetrievalTool::vector("docs", 2, None)]
    }

    #[tokio::test]
    async fn test_summary_question_selects_summary_tool() {
        let router = setup(Arc::new(ScriptedProvider::new())).await;
        let resp = router.route("summarize this", &tools()).await.unwrap();
        assert_eq!(resp.tool, "summarize_docs");
        assert!(!resp.fell_back);
        assert!(!resp.text.is_empty());
        assert_eq!(
            resp.transitions,
            vec![
                RouteState::Received,
                RouteState::Selecting,
                RouteState::Delegating,
                RouteState::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_label_falls_back_to_default() {
        let router = setup(Arc::new(ScriptedProvider::new().with_labels(["no_such_tool"]))).await;
        let resp = router.route("summarize this", &tools()).await.unwrap();
        assert_eq!(resp.tool, "search_docs");
        assert!(resp.fell_back);
        assert!(resp.transitions.contains(&RouteState::Failed));
        assert_eq!(resp.sources.len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_number_falls_back() {
        let router = setup(Arc::new(ScriptedProvider::new().with_labels(["7"]))).await;
        let resp = router.route("anything", &tools()).await.unwrap();
        assert!(resp.fell_back);
        assert_eq!(resp.tool, "search_docs");
    }

    #[tokio::test]
    async fn test_classify_error_falls_back() {
        let router = setup(Arc::new(ScriptedProvider::new().fail_next_classifies(1))).await;
        let resp = router.route("summarize this", &tools()).await.unwrap();
        assert!(resp.fell_back);
        assert_eq!(resp.tool, "search_docs");
    }

    #[tokio::test]
    async fn test_empty_tool_set_is_an_error() {
        let router = setup(Arc::new(ScriptedProvider::new())).await;
        let err = router.route("anything", &[]).await.unwrap_err();
        assert!(matches!(err, RagError::Invalid { op: Operation::Route, .. }));
    }

    #[tokio::test]
    async fn test_delegation_errors_are_attributed_to_route() {
        let router = setup(Arc::new(ScriptedProvider::new())).await;
        let err = router
            .route("anything", &[RetrievalTool::vector("missing", 2, None)])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::UnknownCollection { op: Operation::Route, .. }));
    }

    #[test]
    fn test_label_matching() {
        let tools = tools();
        assert_eq!(match_label("search_docs", &tools).unwrap().name, "search_docs");
        assert_eq!(match_label(" \"SUMMARIZE_DOCS\" ", &tools).unwrap().name, "summarize_docs");
        assert_eq!(match_label("2", &tools).unwrap().name, "search_docs");
        assert!(match_label("0", &tools).is_none());
        assert!(match_label("both", &tools).is_none());
    }
}
