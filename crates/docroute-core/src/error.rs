//! Error types.
//!
//! [`ProviderError`] describes a single failed call to an external
//! collaborator and drives the retry decision. [`RagError`] is what callers
//! see: every variant names the [`Operation`] that failed and the collection
//! (or session) it was working on.

use std::fmt;

use thiserror::Error;

/// The user-visible operation an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Ingest,
    Build,
    Query,
    Summarize,
    Route,
    Chat,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Ingest => "ingest",
            Operation::Build => "build",
            Operation::Query => "query",
            Operation::Summarize => "summarize",
            Operation::Route => "route",
            Operation::Chat => "chat",
        };
        f.write_str(s)
    }
}

/// Outcome of one failed provider, reranker, or vector-store call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The call did not finish within the per-call timeout.
    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Rate limiting, 5xx, or a network failure. Retried.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Rejected request (auth, bad input). Not retried.
    #[error("request rejected: {0}")]
    Fatal(String),

    /// The response could not be interpreted. Not retried.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Timeout(_) | ProviderError::Transient(_))
    }
}

/// Errors surfaced to callers of the catalog, retrieval engine, router, and agent.
#[derive(Error, Debug, Clone)]
pub enum RagError {
    #[error("{op} failed for collection '{collection}': {reason}")]
    Ingest {
        op: Operation,
        collection: String,
        reason: String,
    },

    #[error("{op} failed for collection '{collection}': provider error after {attempts} attempt(s): {source}")]
    Provider {
        op: Operation,
        collection: String,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("{op} failed for collection '{collection}': provider timed out after {attempts} attempt(s)")]
    ProviderTimeout {
        op: Operation,
        collection: String,
        attempts: u32,
    },

    #[error("{op} failed for collection '{collection}': collection has no chunks")]
    EmptyIndex { op: Operation, collection: String },

    #[error("{op} failed: unknown collection '{collection}'")]
    UnknownCollection { op: Operation, collection: String },

    #[error("{op} failed for collection '{collection}': vector store error: {source}")]
    Store {
        op: Operation,
        collection: String,
        #[source]
        source: ProviderError,
    },

    #[error("{op} failed: {reason}")]
    Invalid { op: Operation, reason: String },

    #[error("chat failed for session '{session}': tool call limit of {limit} reached")]
    ToolLimitExceeded { session: String, limit: usize },

    #[error("chat cancelled for session '{session}'")]
    Cancelled { session: String },
}

impl RagError {
    pub fn ingest(collection: &str, reason: impl Into<String>) -> Self {
        RagError::Ingest {
            op: Operation::Ingest,
            collection: collection.to_string(),
            reason: reason.into(),
        }
    }

    pub fn empty_index(op: Operation, collection: &str) -> Self {
        RagError::EmptyIndex {
            op,
            collection: collection.to_string(),
        }
    }

    pub fn store(op: Operation, collection: &str, source: ProviderError) -> Self {
        RagError::Store {
            op,
            collection: collection.to_string(),
            source,
        }
    }

    pub fn invalid(op: Operation, reason: impl Into<String>) -> Self {
        RagError::Invalid {
            op,
            reason: reason.into(),
        }
    }

    /// The operation this error is attributed to.
    pub fn operation(&self) -> Operation {
        match self {
            RagError::Ingest { op, .. }
            | RagError::Provider { op, .. }
            | RagError::ProviderTimeout { op, .. }
            | RagError::EmptyIndex { op, .. }
            | RagError::UnknownCollection { op, .. }
            | RagError::Store { op, .. }
            | RagError::Invalid { op, .. } => *op,
            RagError::ToolLimitExceeded { .. } | RagError::Cancelled { .. } => Operation::Chat,
        }
    }

    /// Re-attribute an error raised by a nested component to the caller's operation.
    ///
    /// Chat-scoped variants are returned unchanged.
    pub fn within(self, outer: Operation) -> Self {
        match self {
            RagError::Ingest { collection, reason, .. } => RagError::Ingest {
                op: outer,
                collection,
                reason,
            },
            RagError::Provider {
                collection,
                attempts,
                source,
                ..
            } => RagError::Provider {
                op: outer,
                collection,
                attempts,
                source,
            },
            RagError::ProviderTimeout {
                collection, attempts, ..
            } => RagError::ProviderTimeout {
                op: outer,
                collection,
                attempts,
            },
            RagError::EmptyIndex { collection, .. } => RagError::EmptyIndex { op: outer, collection },
            RagError::UnknownCollection { collection, .. } => {
                RagError::UnknownCollection { op: outer, collection }
            }
            RagError::Store {
                collection, source, ..
            } => RagError::Store {
                op: outer,
                collection,
                source,
            },
            RagError::Invalid { reason, .. } => RagError::Invalid { op: outer, reason },
            other => other,
        }
    }

    /// True for failures of the upstream model service (as opposed to bad input).
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            RagError::Provider { .. } | RagError::ProviderTimeout { .. } | RagError::Store { .. }
        )
    }
}
