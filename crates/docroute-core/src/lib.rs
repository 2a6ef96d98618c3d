//! # docroute core
//!
//! Runtime-agnostic logic for docroute: data models, sentence chunking,
//! provider and vector-store seams, the vector and summary indexes, the
//! collection catalog, the retrieval engine, the query router, and the
//! tool-calling agent.
//!
//! This crate performs no HTTP or filesystem I/O. Model inference and
//! vector storage are reached only through the [`provider::Provider`],
//! [`provider::Reranker`], and [`store::VectorStore`] traits; concrete
//! backends live in the `docroute` application crate.
//!
//! ```text
//! documents ─▶ chunk ─▶ Catalog ──▶ VectorIndex ──▶ RetrievalEngine ─┐
//!                          │                                        ├─▶ Router ─▶ Agent
//!                          └──────▶ SummaryIndex ───────────────────┘
//! ```

pub mod agent;
pub mod catalog;
pub mod chunk;
pub mod config;
pub mod error;
pub mod index;
pub mod models;
pub mod provider;
pub mod retrieval;
pub mod router;
pub mod store;
pub mod testing;

pub use catalog::Catalog;
pub use config::{AgentConfig, RagConfig};
pub use error::{Operation, ProviderError, RagError};
pub use models::{Answer, Chunk, Collection, Document, ScoredChunk};
