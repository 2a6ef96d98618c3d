//! Local inference via fastembed.
//!
//! - [`LocalProvider`] embeds with a fastembed `TextEmbedding` model and
//!   delegates completion, classification, and agent turns to an
//!   OpenAI-compatible chat endpoint (typically a local Ollama).
//! - [`LocalReranker`] scores candidates with a fastembed cross-encoder.
//!
//! Models are downloaded from Hugging Face on first use and cached. The
//! ONNX sessions are loaded once and run on blocking threads.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, RerankInitOptions, RerankerModel, TextEmbedding, TextRerank};

use docroute_core::provider::{AgentAction, ChatMessage, LabeledOption, Provider, Reranker, ToolSpec};
use docroute_core::ProviderError;

use crate::config::{ProviderConfig, RerankConfig};
use crate::openai::OpenAiProvider;

fn embedding_model(name: &str) -> Result<EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

fn reranker_model(name: &str) -> Result<RerankerModel> {
    match name {
        "bge-reranker-base" => Ok(RerankerModel::BGERerankerBase),
        "bge-reranker-v2-m3" => Ok(RerankerModel::BGERerankerV2M3),
        "jina-reranker-v1-turbo-en" => Ok(RerankerModel::JINARerankerV1TurboEn),
        other => bail!(
            "Unknown local reranker model: '{}'. Supported models: \
             bge-reranker-base, bge-reranker-v2-m3, jina-reranker-v1-turbo-en",
            other
        ),
    }
}

/// fastembed embeddings plus an OpenAI-compatible chat backend.
pub struct LocalProvider {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dims: usize,
    batch_size: usize,
    chat: OpenAiProvider,
}

impl LocalProvider {
    pub fn new(config: &ProviderConfig, chat: OpenAiProvider) -> Result<Self> {
        let model = TextEmbedding::try_new(
            InitOptions::new(embedding_model(&config.embedding_model)?).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
        let dims = config
            .resolved_dims()
            .ok_or_else(|| anyhow::anyhow!("provider.dims required for model '{}'", config.embedding_model))?;
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: config.embedding_model.clone(),
            dims,
            batch_size: config.batch_size,
            chat,
        })
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn model_name(&self) -> &str {
        self.chat.model_name()
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let model = self.model.clone();
        let texts = texts.to_vec();
        let batch_size = self.batch_size;
        let name = self.model_name.clone();
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| ProviderError::Fatal(format!("embedding model '{}' lock poisoned", name)))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| ProviderError::Fatal(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| ProviderError::Fatal(format!("embedding task failed: {}", e)))?
    }

    async fn complete(&self, prompt: &str, context: &[String]) -> Result<String, ProviderError> {
        self.chat.complete(prompt, context).await
    }

    async fn classify(&self, prompt: &str, options: &[LabeledOption]) -> Result<String, ProviderError> {
        self.chat.classify(prompt, options).await
    }

    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<AgentAction, ProviderError> {
        self.chat.chat(messages, tools).await
    }
}

/// fastembed cross-encoder reranker.
pub struct LocalReranker {
    model: Arc<Mutex<TextRerank>>,
    model_name: String,
}

impl LocalReranker {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let model = TextRerank::try_new(
            RerankInitOptions::new(reranker_model(&config.model)?).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local reranker: {}", e))?;
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: config.model.clone(),
        })
    }
}

#[async_trait]
impl Reranker for LocalReranker {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn rerank(&self, query: &str, texts: &[String]) -> Result<Vec<f32>, ProviderError> {
        let model = self.model.clone();
        let query = query.to_string();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| ProviderError::Fatal("reranker lock poisoned".into()))?;
            let results = model
                .rerank(query, &texts, false, None)
                .map_err(|e| ProviderError::Fatal(format!("rerank failed: {}", e)))?;
            // Results come back sorted by score; restore input order.
            let mut scores = vec![f32::MIN; texts.len()];
            for r in results {
                if let Some(slot) = scores.get_mut(r.index) {
                    *slot = r.score;
                }
            }
            Ok(scores)
        })
        .await
        .map_err(|e| ProviderError::Fatal(format!("rerank task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_names_resolve() {
        assert!(embedding_model("bge-small-en-v1.5").is_ok());
        assert!(embedding_model("gpt-embed").is_err());
        assert!(reranker_model("bge-reranker-base").is_ok());
        assert!(reranker_model("ms-marco").is_err());
    }
}
