//! Provider seam: embeddings, completions, classification, and tool calling.
//!
//! Defines the [`Provider`] and [`Reranker`] traits that every model
//! backend implements, the message types exchanged during an agent turn,
//! and [`call_with_retry`], the single place where per-call timeouts and
//! exponential backoff are applied.
//!
//! # Retry Strategy
//!
//! - [`ProviderError::Transient`] and [`ProviderError::Timeout`] → retry
//! - [`ProviderError::Fatal`] and [`ProviderError::Malformed`] → fail immediately
//! - Backoff: `base_delay × 2^(attempt-1)` between attempts
//! - Exhaustion after a timeout surfaces as [`RagError::ProviderTimeout`],
//!   anything else as [`RagError::Provider`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Operation, ProviderError, RagError};

/// A choice offered to [`Provider::classify`].
#[derive(Debug, Clone, Serialize)]
pub struct LabeledOption {
    pub label: String,
    pub description: String,
}

/// Message author within an agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// For `Assistant` tool requests and `Tool` results: the call id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For `Assistant` tool requests: the requested tool and its arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn tool_request(call: ToolCall) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_call_id: Some(call.id.clone()),
            tool_call: Some(call),
        }
    }

    pub fn tool_result(call_id: &str, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.to_string()),
            tool_call: None,
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_call: None,
        }
    }
}

/// A tool invocation requested by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Declared tool surface offered to the provider during an agent turn.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: Value,
}

/// What the provider wants to do next in an agent turn.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    CallTool(ToolCall),
    Reply(String),
}

/// Trait for model backends.
///
/// Implementations perform exactly one attempt per call; retries and
/// timeouts are applied by the caller through [`call_with_retry`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the chat/completion model identifier.
    fn model_name(&self) -> &str;

    /// Returns the embedding dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Produce a completion for `prompt`, grounded on `context` passages.
    async fn complete(&self, prompt: &str, context: &[String]) -> Result<String, ProviderError>;

    /// Pick exactly one of `options`, returning its label.
    ///
    /// The returned label is not guaranteed to be one of the options;
    /// callers must validate it.
    async fn classify(&self, prompt: &str, options: &[LabeledOption]) -> Result<String, ProviderError>;

    /// Decide the next step of an agent turn given the history and tools.
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<AgentAction, ProviderError>;
}

/// Secondary relevance scorer used to narrow retrieval candidates.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn model_name(&self) -> &str;

    /// Score each text against `query`; higher is more relevant.
    async fn rerank(&self, query: &str, texts: &[String]) -> Result<Vec<f32>, ProviderError>;
}

/// Bounded retry with per-call timeout and exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Treated as at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (1-based; the first attempt has none).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.base_delay * (1u32 << (attempt - 2).min(5))
    }
}

/// Run `call` under `policy`, attributing exhaustion to `op` on `collection`.
///
/// The in-flight call is never interrupted other than by the per-call
/// timeout.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op: Operation,
    collection: &str,
    mut call: F,
) -> Result<T, RagError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_err = ProviderError::Transient("no attempt made".to_string());

    for attempt in 1..=max_attempts {
        let delay = policy.backoff(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(policy.timeout)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                tracing::warn!(%op, collection, attempt, error = %err, "provider call failed, retrying");
                last_err = err;
            }
            Err(err) => {
                last_err = err;
                return Err(exhausted(op, collection, attempt, last_err));
            }
        }
    }

    Err(exhausted(op, collection, max_attempts, last_err))
}

fn exhausted(op: Operation, collection: &str, attempts: u32, err: ProviderError) -> RagError {
    match err {
        ProviderError::Timeout(_) => RagError::ProviderTimeout {
            op,
            collection: collection.to_string(),
            attempts,
        },
        source => RagError::Provider {
            op,
            collection: collection.to_string(),
            attempts,
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let p = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(p.backoff(1), Duration::ZERO);
        assert_eq!(p.backoff(2), Duration::from_millis(100));
        assert_eq!(p.backoff(3), Duration::from_millis(200));
        assert_eq!(p.backoff(4), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry(&fast_policy(), Operation::Query, "docs", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::Transient("503".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = call_with_retry(&fast_policy(), Operation::Ingest, "docs", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Fatal("401".into())) }
        })
        .await;
        assert!(matches!(result, Err(RagError::Provider { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_exhaustion_is_provider_timeout() {
        let result: Result<(), _> = call_with_retry(&fast_policy(), Operation::Query, "docs", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        match result {
            Err(RagError::ProviderTimeout { op, collection, attempts }) => {
                assert_eq!(op, Operation::Query);
                assert_eq!(collection, "docs");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected ProviderTimeout, got {:?}", other),
        }
    }
}
