//! Deterministic test doubles for the provider and reranker seams.
//!
//! Used by this crate's unit tests, its integration tests, and the
//! application crate's tests. Nothing here touches the network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::provider::{AgentAction, ChatMessage, LabeledOption, Provider, Reranker, ToolCall, ToolSpec};

const DEFAULT_DIMS: usize = 64;

/// Scripted, deterministic [`Provider`].
///
/// - `embed`: bag-of-words hashed into `dims` buckets, unless the exact
///   text was pinned with [`pin_embedding`](Self::pin_embedding).
/// - `complete`: echoes the context passages, `answer(p1 | p2 | ...)`.
/// - `classify`: pops scripted labels; otherwise picks the option whose
///   description shares the most words with the prompt.
/// - `chat`: pops scripted actions; otherwise replies `"ok"`.
pub struct ScriptedProvider {
    dims: usize,
    pinned: HashMap<String, Vec<f32>>,
    labels: Mutex<VecDeque<String>>,
    actions: Mutex<VecDeque<AgentAction>>,
    seen_chats: Mutex<Vec<Vec<ChatMessage>>>,
    embed_failures: AtomicU32,
    embed_delay: Option<Duration>,
    classify_failures: AtomicU32,
    embed_calls: AtomicU32,
    complete_calls: AtomicU32,
    classify_calls: AtomicU32,
    chat_calls: AtomicU32,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            dims: DEFAULT_DIMS,
            pinned: HashMap::new(),
            labels: Mutex::new(VecDeque::new()),
            actions: Mutex::new(VecDeque::new()),
            seen_chats: Mutex::new(Vec::new()),
            embed_failures: AtomicU32::new(0),
            embed_delay: None,
            classify_failures: AtomicU32::new(0),
            embed_calls: AtomicU32::new(0),
            complete_calls: AtomicU32::new(0),
            classify_calls: AtomicU32::new(0),
            chat_calls: AtomicU32::new(0),
        }
    }

    /// Return `vector` whenever exactly `text` is embedded.
    ///
    /// Also sets `dims` to the vector's length.
    pub fn pin_embedding(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.dims = vector.len();
        self.pinned.insert(text.to_string(), vector);
        self
    }

    /// Queue labels returned by successive `classify` calls.
    pub fn with_labels<I, S>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut queue) = self.labels.lock() {
            queue.extend(labels.into_iter().map(Into::into));
        }
        self
    }

    /// Queue actions returned by successive `chat` calls.
    pub fn with_actions(self, actions: impl IntoIterator<Item = AgentAction>) -> Self {
        if let Ok(mut queue) = self.actions.lock() {
            queue.extend(actions);
        }
        self
    }

    /// Queue `n` identical tool calls followed by a final reply.
    pub fn with_tool_loop(self, tool: &str, arguments: Value, n: usize) -> Self {
        let mut actions: Vec<AgentAction> = (0..n)
            .map(|i| {
                AgentAction::CallTool(ToolCall {
                    id: format!("call_{}", i),
                    name: tool.to_string(),
                    arguments: arguments.clone(),
                })
            })
            .collect();
        actions.push(AgentAction::Reply("finished".to_string()));
        self.with_actions(actions)
    }

    /// Fail the next `n` embed calls with a transient error.
    pub fn fail_next_embeds(self, n: u32) -> Self {
        self.embed_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Like [`fail_next_embeds`](Self::fail_next_embeds), on a shared provider.
    pub fn fail_embeds_from_now(&self, n: u32) {
        self.embed_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` classify calls with a fatal error.
    pub fn fail_next_classifies(self, n: u32) -> Self {
        self.classify_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Sleep this long inside every embed call.
    pub fn with_embed_delay(mut self, delay: Duration) -> Self {
        self.embed_delay = Some(delay);
        self
    }

    pub fn embed_calls(&self) -> u32 {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> u32 {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn classify_calls(&self) -> u32 {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn chat_calls(&self) -> u32 {
        self.chat_calls.load(Ordering::SeqCst)
    }

    /// Message lists received by `chat`, in call order.
    pub fn seen_chats(&self) -> Vec<Vec<ChatMessage>> {
        self.seen_chats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn bag_of_words(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in words(text) {
            let bucket = word
                .bytes()
                .fold(7u64, |h, b| h.wrapping_mul(31).wrapping_add(b as u64));
            v[(bucket % self.dims as u64) as usize] += 1.0;
        }
        v
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.embed_delay {
            tokio::time::sleep(delay).await;
        }
        if take_failure(&self.embed_failures) {
            return Err(ProviderError::Transient("scripted embed failure".into()));
        }
        Ok(texts
            .iter()
            .map(|t| match self.pinned.get(t) {
                Some(v) => v.clone(),
                None => self.bag_of_words(t),
            })
            .collect())
    }

    async fn complete(&self, _prompt: &str, context: &[String]) -> Result<String, ProviderError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("answer({})", context.join(" | ")))
    }

    async fn classify(&self, prompt: &str, options: &[LabeledOption]) -> Result<String, ProviderError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.classify_failures) {
            return Err(ProviderError::Fatal("scripted classify failure".into()));
        }
        if let Some(label) = self.labels.lock().ok().and_then(|mut q| q.pop_front()) {
            return Ok(label);
        }
        let prompt_words: Vec<String> = words(prompt).collect();
        let best = options
            .iter()
            .enumerate()
            .max_by_key(|(i, o)| {
                let overlap = words(&o.description)
                    .filter(|w| w.chars().count() > 3)
                    .filter(|w| {
                        let stem: String = w.chars().take(4).collect();
                        prompt_words.iter().any(|p| p.starts_with(&stem))
                    })
                    .count();
                // Earlier options win ties.
                (overlap, usize::MAX - i)
            })
            .map(|(_, o)| o.label.clone())
            .unwrap_or_default();
        Ok(best)
    }

    async fn chat(&self, messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<AgentAction, ProviderError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen_chats.lock() {
            seen.push(messages.to_vec());
        }
        let next = self.actions.lock().ok().and_then(|mut q| q.pop_front());
        Ok(next.unwrap_or_else(|| AgentAction::Reply("ok".to_string())))
    }
}

/// [`Reranker`] scoring by the number of query words found in each text.
pub struct KeywordReranker;

#[async_trait]
impl Reranker for KeywordReranker {
    fn model_name(&self) -> &str {
        "keyword"
    }

    async fn rerank(&self, query: &str, texts: &[String]) -> Result<Vec<f32>, ProviderError> {
        let query_words: Vec<String> = words(query).collect();
        Ok(texts
            .iter()
            .map(|t| {
                let text_words: Vec<String> = words(t).collect();
                query_words.iter().filter(|q| text_words.contains(q)).count() as f32
            })
            .collect())
    }
}
