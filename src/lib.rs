//! # docroute
//!
//! Document question answering that routes each query to the retrieval
//! strategy that suits it.
//!
//! Uploaded files are chunked, embedded, and indexed twice: a vector index
//! for pinpoint questions and a hierarchical summary index for "what is
//! this about" questions. A router asks the model which of the two fits a
//! query, and a tool-calling agent drives ingestion and retrieval from a
//! conversation. The core logic lives in `docroute-core`; this crate adds
//! the concrete model and vector-store backends, file extraction, the CLI,
//! and the HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌─────────────────┐
//! │   Upload    │──▶│   Extract   │──▶│     Catalog     │
//! │ CLI / HTTP  │   │ PDF / DOCX  │   │ vector + summary│
//! └─────────────┘   └─────────────┘   └────────┬────────┘
//!                                              │
//!                      ┌───────────────────────┤
//!                      ▼                       ▼
//!                 ┌──────────┐           ┌──────────┐
//!                 │  Router  │           │  Agent   │
//!                 └──────────┘           └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docroute query --file paper.pdf "What dataset was used?"
//! docroute summarize --file paper.pdf "What is this paper about?"
//! docroute route --file paper.pdf "Summarize the results"
//! docroute chat
//! docroute serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`app`] | Builds the core components from config |
//! | [`openai`] | OpenAI-compatible model provider |
//! | `local` | fastembed embeddings and reranking (feature `local-embeddings`) |
//! | [`milvus`] | Milvus vector store |
//! | [`extract`] | PDF and DOCX text extraction |
//! | [`ingest`] | File ingestion |
//! | [`server`] | HTTP API |

pub mod app;
pub mod config;
pub mod extract;
pub mod ingest;
#[cfg(feature = "local-embeddings")]
pub mod local;
pub mod milvus;
pub mod openai;
pub mod server;
