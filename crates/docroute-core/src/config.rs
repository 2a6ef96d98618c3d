//! Explicit configuration handed to core components at construction.
//!
//! The application crate maps its TOML file onto these values; nothing in
//! the core reads process-wide settings.

use std::time::Duration;

use crate::provider::RetryPolicy;

/// Tuning for chunking, index builds, retrieval, and routing.
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// Maximum chunk size in tokens (1 token ≈ 4 chars).
    pub max_tokens: usize,
    /// Trailing sentences carried into the next chunk, in tokens.
    pub overlap_tokens: usize,
    /// Chunks per embedding request.
    pub embed_batch_size: usize,
    /// Bounded worker pool for embedding batches and summary subtrees.
    pub workers: usize,
    /// Default number of candidates retrieved from the vector index.
    pub top_k: usize,
    /// Default number of candidates kept after reranking.
    pub rerank_top_n: Option<usize>,
    /// Candidates scoring below this are dropped before synthesis.
    pub similarity_cutoff: Option<f32>,
    /// Partial summaries combined per provider call.
    pub summary_branching: usize,
    pub retry: RetryPolicy,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            overlap_tokens: 0,
            embed_batch_size: 64,
            workers: 4,
            top_k: 5,
            rerank_top_n: Some(3),
            similarity_cutoff: None,
            summary_branching: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// Agent loop settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub system_prompt: String,
    /// Tool invocations allowed per user turn.
    pub max_tool_calls: usize,
    /// Utterances (case-insensitive, trimmed) that end the session.
    pub end_phrases: Vec<String>,
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an agent designed to answer queries over a set of documents. \
Load user-specified data with the ingestion tool when the user uploads files, then use the retrieval \
tools to answer questions and summarize relevant information. Do not rely on prior knowledge. \
This is a back and forth conversation: keep asking the user if there is anything else they want to do \
until they say they are done, and suggest parameters they can set (for example how many documents to retrieve).";

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tool_calls: 5,
            end_phrases: ["done", "bye", "exit", "quit", "that's all"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl RagConfig {
    /// Config suited to unit tests: no retry delays and short timeouts.
    pub fn for_tests() -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                timeout: Duration::from_millis(200),
            },
            ..Self::default()
        }
    }
}
