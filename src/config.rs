//! TOML configuration.
//!
//! Every section is optional; missing keys take the defaults below.
//!
//! ```toml
//! [chunking]
//! max_tokens = 1024
//!
//! [retrieval]
//! top_k = 5
//! rerank_top_n = 3
//! default_tool = "vector"
//!
//! [provider]
//! kind = "openai"
//! chat_model = "gpt-3.5-turbo"
//! embedding_model = "text-embedding-ada-002"
//! dims = 1536
//!
//! [vector_store]
//! kind = "milvus"
//! uri = "http://localhost:19530"
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```
//!
//! [`Config::rag`] and [`Config::agent`] convert the file into the explicit
//! values the core components take at construction.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use docroute_core::config::DEFAULT_SYSTEM_PROMPT;
use docroute_core::provider::RetryPolicy;
use docroute_core::{AgentConfig, RagConfig};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default)]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: 0,
        }
    }
}

fn default_max_tokens() -> usize {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: Option<usize>,
    #[serde(default)]
    pub similarity_cutoff: Option<f32>,
    #[serde(default = "default_branching")]
    pub summary_branching: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Engine kind the router falls back to: `"vector"` or `"summary"`.
    #[serde(default = "default_tool")]
    pub default_tool: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            rerank_top_n: default_rerank_top_n(),
            similarity_cutoff: None,
            summary_branching: default_branching(),
            workers: default_workers(),
            default_tool: default_tool(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_rerank_top_n() -> Option<usize> {
    Some(3)
}
fn default_branching() -> usize {
    4
}
fn default_workers() -> usize {
    4
}
fn default_tool() -> String {
    "vector".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// `"openai"`, `"local"` (fastembed embeddings, OpenAI-compatible chat), or `"disabled"`.
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            base_url: default_base_url(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            dims: None,
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            timeout_secs: default_timeout_secs(),
            backoff_ms: default_backoff_ms(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_provider_kind() -> String {
    "openai".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_chat_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_attempts() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl ProviderConfig {
    /// Embedding dimensionality, falling back to the known size of the model.
    pub fn resolved_dims(&self) -> Option<usize> {
        self.dims.or(match self.embedding_model.as_str() {
            "text-embedding-ada-002" | "text-embedding-3-small" => Some(1536),
            "text-embedding-3-large" => Some(3072),
            "all-minilm-l6-v2" | "bge-small-en-v1.5" | "multilingual-e5-small" => Some(384),
            "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" | "multilingual-e5-base" => {
                Some(768)
            }
            "bge-large-en-v1.5" | "multilingual-e5-large" => Some(1024),
            _ => None,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_ms),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    /// `"none"` or `"local"` (fastembed cross-encoder).
    #[serde(default = "default_rerank_kind")]
    pub kind: String,
    #[serde(default = "default_rerank_model")]
    pub model: String,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            kind: default_rerank_kind(),
            model: default_rerank_model(),
        }
    }
}

fn default_rerank_kind() -> String {
    "none".to_string()
}
fn default_rerank_model() -> String {
    "bge-reranker-base".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    /// `"memory"` or `"milvus"`.
    #[serde(default = "default_store_kind")]
    pub kind: String,
    #[serde(default = "default_store_uri")]
    pub uri: String,
    /// Environment variable holding the Milvus token, if any.
    #[serde(default)]
    pub token_env: Option<String>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            kind: default_store_kind(),
            uri: default_store_uri(),
            token_env: None,
        }
    }
}

fn default_store_kind() -> String {
    "memory".to_string()
}
fn default_store_uri() -> String {
    "http://localhost:19530".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentSection {
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub end_phrases: Option<Vec<String>>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_tool_calls: default_max_tool_calls(),
            system_prompt: None,
            end_phrases: None,
        }
    }
}

fn default_max_tool_calls() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    pub fn rag(&self) -> RagConfig {
        RagConfig {
            max_tokens: self.chunking.max_tokens,
            overlap_tokens: self.chunking.overlap_tokens,
            embed_batch_size: self.provider.batch_size,
            workers: self.retrieval.workers,
            top_k: self.retrieval.top_k,
            rerank_top_n: self.retrieval.rerank_top_n,
            similarity_cutoff: self.retrieval.similarity_cutoff,
            summary_branching: self.retrieval.summary_branching,
            retry: self.provider.retry_policy(),
        }
    }

    pub fn agent(&self) -> AgentConfig {
        let defaults = AgentConfig::default();
        AgentConfig {
            system_prompt: self
                .agent
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tool_calls: self.agent.max_tool_calls,
            end_phrases: self.agent.end_phrases.clone().unwrap_or(defaults.end_phrases),
        }
    }
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!("chunking.overlap_tokens must be smaller than chunking.max_tokens");
    }

    let retrieval = &config.retrieval;
    if retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if let Some(n) = retrieval.rerank_top_n {
        if n == 0 || n > retrieval.top_k {
            bail!("retrieval.rerank_top_n must be in [1, top_k]");
        }
    }
    if let Some(cutoff) = retrieval.similarity_cutoff {
        if !(-1.0..=1.0).contains(&cutoff) {
            bail!("retrieval.similarity_cutoff must be in [-1.0, 1.0]");
        }
    }
    if retrieval.summary_branching < 2 {
        bail!("retrieval.summary_branching must be >= 2");
    }
    if retrieval.workers == 0 {
        bail!("retrieval.workers must be >= 1");
    }
    match retrieval.default_tool.as_str() {
        "vector" | "summary" => {}
        other => bail!("Unknown retrieval.default_tool: '{}'. Must be vector or summary.", other),
    }

    let provider = &config.provider;
    match provider.kind.as_str() {
        "openai" | "local" | "disabled" => {}
        other => bail!(
            "Unknown provider kind: '{}'. Must be openai, local, or disabled.",
            other
        ),
    }
    if provider.kind != "disabled" && provider.resolved_dims().unwrap_or(0) == 0 {
        bail!(
            "provider.dims must be > 0 (no known size for embedding model '{}')",
            provider.embedding_model
        );
    }
    if provider.max_attempts == 0 {
        bail!("provider.max_attempts must be >= 1");
    }
    if provider.batch_size == 0 {
        bail!("provider.batch_size must be >= 1");
    }

    match config.rerank.kind.as_str() {
        "none" | "local" => {}
        other => bail!("Unknown rerank kind: '{}'. Must be none or local.", other),
    }
    match config.vector_store.kind.as_str() {
        "memory" | "milvus" => {}
        other => bail!("Unknown vector_store kind: '{}'. Must be memory or milvus.", other),
    }
    if config.agent.max_tool_calls == 0 {
        bail!("agent.max_tool_calls must be >= 1");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.chunking.max_tokens, 1024);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.rerank_top_n, Some(3));
        assert_eq!(config.provider.chat_model, "gpt-3.5-turbo");
        assert_eq!(config.provider.resolved_dims(), Some(1536));
        assert_eq!(config.server.bind, "127.0.0.1:7341");

        let rag = config.rag();
        assert_eq!(rag.retry.max_attempts, 3);
        assert_eq!(rag.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.agent().max_tool_calls, 5);
    }

    #[test]
    fn test_rejects_unknown_kinds() {
        let err = parse_config("[provider]\nkind = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown provider kind"));
        assert!(parse_config("[vector_store]\nkind = \"faiss\"\n").is_err());
        assert!(parse_config("[retrieval]\ndefault_tool = \"both\"\n").is_err());
    }

    #[test]
    fn test_rerank_top_n_bounded_by_top_k() {
        assert!(parse_config("[retrieval]\ntop_k = 2\nrerank_top_n = 3\n").is_err());
        assert!(parse_config("[retrieval]\ntop_k = 2\nrerank_top_n = 2\n").is_ok());
    }

    #[test]
    fn test_unknown_model_needs_explicit_dims() {
        let toml = "[provider]\nembedding_model = \"custom\"\n";
        assert!(parse_config(toml).is_err());
        let toml = "[provider]\nembedding_model = \"custom\"\ndims = 8\n";
        assert_eq!(parse_config(toml).unwrap().provider.resolved_dims(), Some(8));
    }

    #[test]
    fn test_agent_overrides() {
        let toml = "[agent]\nmax_tool_calls = 2\nend_phrases = [\"stop\"]\n";
        let agent = parse_config(toml).unwrap().agent();
        assert_eq!(agent.max_tool_calls, 2);
        assert_eq!(agent.end_phrases, vec!["stop".to_string()]);
        assert_eq!(agent.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }
}
