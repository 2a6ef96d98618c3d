//! Conversational agent with a bounded tool-calling loop.
//!
//! Each user turn runs until the provider replies in plain text:
//!
//! 1. The provider sees the session history and the declared tools.
//! 2. A tool request is dispatched by name to an [`AgentTool`] variant and
//!    its result is appended to the history as a `tool` message.
//! 3. A request beyond `max_tool_calls` in one turn ends the turn with
//!    [`RagError::ToolLimitExceeded`].
//!
//! Unknown tool names and tool failures caused by bad arguments or missing
//! collections are reported back to the provider as tool messages, so it
//! can correct itself. Provider and vector-store failures end the turn.
//!
//! A [`CancelToken`] is checked before every provider call and tool
//! invocation; a call already in flight is allowed to finish.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::config::AgentConfig;
use crate::error::{Operation, RagError};
use crate::models::{Document, ScoredChunk};
use crate::provider::{call_with_retry, AgentAction, ChatMessage, Provider, RetryPolicy, ToolCall, ToolSpec};
use crate::retrieval::RetrievalEngine;
use crate::router::RetrievalTool;

pub const INGEST_TOOL: &str = "ingest_files";
pub const LIST_TOOL: &str = "list_collections";

const GOODBYE: &str = "Goodbye!";

/// A tool the agent can offer the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentTool {
    /// Ingest session attachments into a collection.
    Ingest,
    /// List the catalog's collections.
    ListCollections,
    /// Answer a query with a retrieval tool.
    Retrieve(RetrievalTool),
}

impl AgentTool {
    pub fn name(&self) -> &str {
        match self {
            AgentTool::Ingest => INGEST_TOOL,
            AgentTool::ListCollections => LIST_TOOL,
            AgentTool::Retrieve(tool) => &tool.name,
        }
    }

    /// Declared name, description, and JSON Schema.
    pub fn spec(&self) -> ToolSpec {
        match self {
            AgentTool::Ingest => ToolSpec {
                name: INGEST_TOOL.to_string(),
                description: "Load files the user has uploaded into a named collection, replacing its contents."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "collection": {
                            "type": "string",
                            "description": "Collection name: letters, digits, and underscores"
                        },
                        "files": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Uploaded file names to load. Defaults to every uploaded file."
                        }
                    },
                    "required": ["collection"]
                }),
            },
            AgentTool::ListCollections => ToolSpec {
                name: LIST_TOOL.to_string(),
                description: "List the document collections that can be queried.".to_string(),
                parameters: json!({ "type": "object", "properties": {} }),
            },
            AgentTool::Retrieve(tool) => ToolSpec {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The question to answer from the collection"
                        }
                    },
                    "required": ["query"]
                }),
            },
        }
    }
}

/// Retrieval tools offered for `collection` once it exists.
pub fn collection_tools(collection: &str, top_k: usize, rerank_top_n: Option<usize>) -> [AgentTool; 2] {
    let search = RetrievalTool::vector(collection, top_k, rerank_top_n);
    let search_desc = format!("{} Collection: {}.", search.description, collection);
    let summary = RetrievalTool::summary(collection);
    let summary_desc = format!("{} Collection: {}.", summary.description, collection);
    [
        AgentTool::Retrieve(search.with_description(search_desc)),
        AgentTool::Retrieve(summary.with_description(summary_desc)),
    ]
}

/// Cooperative cancellation flag for a chat turn.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Conversation state for one session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub history: Vec<ChatMessage>,
    pub tools: Vec<AgentTool>,
    /// Uploaded documents by file name, awaiting ingestion.
    pub attachments: BTreeMap<String, Document>,
    pub finished: bool,
}

impl Session {
    fn add_tool(&mut self, tool: AgentTool) {
        if !self.tools.iter().any(|t| t.name() == tool.name()) {
            self.tools.push(tool);
        }
    }
}

/// Result of one user turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub text: String,
    /// Chunks returned by retrieval tools during the turn, in call order.
    pub sources: Vec<ScoredChunk>,
    pub tool_calls: usize,
    /// The user ended the session.
    pub finished: bool,
}

struct ToolOutcome {
    content: String,
    sources: Vec<ScoredChunk>,
}

/// Session registry and turn loop.
pub struct Agent {
    provider: Arc<dyn Provider>,
    catalog: Arc<Catalog>,
    engine: Arc<RetrievalEngine>,
    config: AgentConfig,
    retry: RetryPolicy,
    sessions: StdMutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn Provider>,
        catalog: Arc<Catalog>,
        engine: Arc<RetrievalEngine>,
        config: AgentConfig,
    ) -> Self {
        let retry = catalog.config().retry.clone();
        Self {
            provider,
            catalog,
            engine,
            config,
            retry,
            sessions: StdMutex::new(HashMap::new()),
        }
    }

    /// Retrieval tools for `collection`. Reranking only applies when the
    /// engine has a reranker.
    fn retrieval_tools(&self, collection: &str) -> [AgentTool; 2] {
        let rag = self.catalog.config();
        let rerank_top_n = if self.engine.has_reranker() {
            rag.rerank_top_n.map(|n| n.min(rag.top_k))
        } else {
            None
        };
        collection_tools(collection, rag.top_k, rerank_top_n)
    }

    /// Start a session offering ingestion, listing, and retrieval over
    /// every existing collection. Returns the session id.
    pub async fn open_session(&self) -> Result<String, RagError> {
        let id = Uuid::new_v4().to_string();
        let mut tools = vec![AgentTool::Ingest, AgentTool::ListCollections];
        for info in self.catalog.list().await {
            tools.extend(self.retrieval_tools(&info.name));
        }
        let session = Session {
            id: id.clone(),
            history: vec![ChatMessage::system(self.config.system_prompt.clone())],
            tools,
            attachments: BTreeMap::new(),
            finished: false,
        };
        self.sessions
            .lock()
            .map_err(|_| poisoned())?
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        tracing::debug!(session = %id, "session opened");
        Ok(id)
    }

    pub fn close_session(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .map(|mut s| s.remove(session_id).is_some())
            .unwrap_or(false)
    }

    /// Attach an uploaded document for a later ingest tool call.
    pub async fn attach(&self, session_id: &str, document: Document) -> Result<(), RagError> {
        let session = self.session(session_id)?;
        let mut session = session.lock().await;
        tracing::debug!(session = %session_id, file = %document.id, "file attached");
        session.attachments.insert(document.id.clone(), document);
        Ok(())
    }

    /// Offer an extra tool in this session.
    pub async fn add_tool(&self, session_id: &str, tool: AgentTool) -> Result<(), RagError> {
        let session = self.session(session_id)?;
        session.lock().await.add_tool(tool);
        Ok(())
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<ChatMessage>, RagError> {
        let session = self.session(session_id)?;
        let history = session.lock().await.history.clone();
        Ok(history)
    }

    /// Run one user turn.
    pub async fn chat(&self, session_id: &str, utterance: &str, cancel: &CancelToken) -> Result<ChatReply, RagError> {
        let session = self.session(session_id)?;
        let mut session = session.lock().await;
        if session.finished {
            return Err(RagError::invalid(
                Operation::Chat,
                format!("session '{}' has ended", session_id),
            ));
        }

        if self.is_end_phrase(utterance) {
            session.history.push(ChatMessage::user(utterance));
            session.history.push(ChatMessage::assistant(GOODBYE));
            session.finished = true;
            tracing::info!(session = %session_id, "session ended by user");
            return Ok(ChatReply {
                text: GOODBYE.to_string(),
                sources: Vec::new(),
                tool_calls: 0,
                finished: true,
            });
        }

        session.history.push(ChatMessage::user(utterance));
        let mut calls = 0usize;
        let mut sources = Vec::new();

        loop {
            check_cancel(cancel, session_id)?;
            let specs: Vec<ToolSpec> = session.tools.iter().map(AgentTool::spec).collect();
            let history = &session.history;
            let action = call_with_retry(&self.retry, Operation::Chat, session_id, || {
                self.provider.chat(history, &specs)
            })
            .await?;

            let call = match action {
                AgentAction::Reply(text) => {
                    session.history.push(ChatMessage::assistant(text.clone()));
                    tracing::debug!(session = %session_id, tool_calls = calls, "turn complete");
                    return Ok(ChatReply {
                        text,
                        sources,
                        tool_calls: calls,
                        finished: false,
                    });
                }
                AgentAction::CallTool(call) => call,
            };

            if calls >= self.config.max_tool_calls {
                tracing::warn!(
                    session = %session_id,
                    limit = self.config.max_tool_calls,
                    tool = %call.name,
                    "tool call limit reached"
                );
                return Err(RagError::ToolLimitExceeded {
                    session: session_id.to_string(),
                    limit: self.config.max_tool_calls,
                });
            }
            check_cancel(cancel, session_id)?;
            calls += 1;

            tracing::info!(session = %session_id, tool = %call.name, call = calls, "invoking tool");
            session.history.push(ChatMessage::tool_request(call.clone()));
            match self.invoke(&mut session, &call).await {
                Ok(outcome) => {
                    sources.extend(outcome.sources);
                    session.history.push(ChatMessage::tool_result(&call.id, outcome.content));
                }
                Err(e) if e.is_upstream() => {
                    // Every tool request in history needs a matching result.
                    session
                        .history
                        .push(ChatMessage::tool_result(&call.id, format!("error: {}", e)));
                    return Err(e.within(Operation::Chat));
                }
                Err(e) => {
                    tracing::debug!(session = %session_id, tool = %call.name, error = %e, "tool failed");
                    session
                        .history
                        .push(ChatMessage::tool_result(&call.id, format!("error: {}", e)));
                }
            }
        }
    }

    async fn invoke(&self, session: &mut Session, call: &ToolCall) -> Result<ToolOutcome, RagError> {
        let tool = session
            .tools
            .iter()
            .find(|t| t.name() == call.name)
            .cloned()
            .ok_or_else(|| RagError::invalid(Operation::Chat, format!("unknown tool '{}'", call.name)))?;

        match tool {
            AgentTool::Ingest => self.ingest_attachments(session, &call.arguments).await,
            AgentTool::ListCollections => {
                let listed: Vec<Value> = self
                    .catalog
                    .list()
                    .await
                    .into_iter()
                    .map(|c| json!({ "name": c.name, "version": c.version, "chunks": c.chunk_count }))
                    .collect();
                Ok(ToolOutcome {
                    content: Value::Array(listed).to_string(),
                    sources: Vec::new(),
                })
            }
            AgentTool::Retrieve(tool) => {
                let query = string_arg(&call.arguments, "query")
                    .ok_or_else(|| RagError::invalid(Operation::Chat, "missing 'query' argument"))?;
                let answer = tool.run(&self.catalog, &self.engine, &query, Operation::Chat).await?;
                Ok(ToolOutcome {
                    content: answer.text,
                    sources: answer.sources,
                })
            }
        }
    }

    async fn ingest_attachments(&self, session: &mut Session, args: &Value) -> Result<ToolOutcome, RagError> {
        let collection = string_arg(args, "collection")
            .ok_or_else(|| RagError::invalid(Operation::Ingest, "missing 'collection' argument"))?;

        let requested: Option<Vec<String>> = object_arg(args, "files").and_then(|v| {
            v.as_array()
                .map(|a| a.iter().filter_map(|f| f.as_str().map(str::to_string)).collect())
        });
        let documents: Vec<Document> = match requested {
            Some(names) if !names.is_empty() => names
                .iter()
                .map(|n| {
                    session
                        .attachments
                        .get(n)
                        .cloned()
                        .ok_or_else(|| RagError::ingest(&collection, format!("no uploaded file named '{}'", n)))
                })
                .collect::<Result<_, _>>()?,
            _ => session.attachments.values().cloned().collect(),
        };
        if documents.is_empty() {
            return Err(RagError::ingest(&collection, "no files have been uploaded"));
        }

        let count = documents.len();
        let ingested = self.catalog.ingest(&collection, documents).await?;
        for tool in self.retrieval_tools(&collection) {
            session.add_tool(tool);
        }
        Ok(ToolOutcome {
            content: format!(
                "Ingested {} file(s) into collection '{}' (version {}, {} chunks). Use search_{} or summarize_{} to query it.",
                count,
                ingested.name,
                ingested.version,
                ingested.chunk_count(),
                ingested.name,
                ingested.name
            ),
            sources: Vec::new(),
        })
    }

    fn session(&self, session_id: &str) -> Result<Arc<Mutex<Session>>, RagError> {
        self.sessions
            .lock()
            .map_err(|_| poisoned())?
            .get(session_id)
            .cloned()
            .ok_or_else(|| RagError::invalid(Operation::Chat, format!("unknown session '{}'", session_id)))
    }

    fn is_end_phrase(&self, utterance: &str) -> bool {
        let normalized = utterance
            .trim()
            .trim_end_matches(|c: char| c == '.' || c == '!')
            .to_lowercase();
        self.config.end_phrases.iter().any(|p| p.to_lowercase() == normalized)
    }
}

fn check_cancel(cancel: &CancelToken, session_id: &str) -> Result<(), RagError> {
    if cancel.is_cancelled() {
        tracing::info!(session = %session_id, "chat turn cancelled");
        return Err(RagError::Cancelled {
            session: session_id.to_string(),
        });
    }
    Ok(())
}

fn poisoned() -> RagError {
    RagError::invalid(Operation::Chat, "session registry lock poisoned")
}

/// Providers may send arguments as an object or as a JSON-encoded string.
fn object_arg(args: &Value, key: &str) -> Option<Value> {
    match args {
        Value::Object(map) => map.get(key).cloned(),
        Value::String(s) => serde_json::from_str::<Value>(s).ok()?.get(key).cloned(),
        _ => None,
    }
}

fn string_arg(args: &Value, key: &str) -> Option<String> {
    object_arg(args, key)?.as_str().map(str::to_string)
}
