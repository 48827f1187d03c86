//! # docqa
//!
//! A document question-answering backend built on retrieval-augmented
//! generation.
//!
//! Users upload PDF or DOCX files. Their text is chunked, embedded, and
//! written to a vector index tagged with the owner's id. Questions are
//! answered by retrieving the closest chunks from that user's records only
//! and handing them to a chat model as context.
//!
//! ## Architecture
//!
//! ```text
//! upload ─▶ extract ─▶ chunk ─▶ embed ─▶ VectorIndex.upsert ─▶ mark indexed
//!                                              │
//! ask ─▶ embed ─▶ VectorIndex.query(user) ─────┘─▶ context ─▶ LLM ─▶ answer
//! ```
//!
//! Three external services sit on the query path (embedding model, vector
//! index, LLM). Every call to them goes through [`retry::RetryPolicy`] and
//! failures come back as [`error::RagError`] tagged with the failing stage.
//!
//! ## Quick Start
//!
//! ```bash
//! docqa init
//! docqa upload ./handbook.pdf --user 1
//! docqa ask "What is the refund policy?" --user 1
//! docqa serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`retry`] | Bounded exponential backoff |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index abstraction (memory, Pinecone) |
//! | [`extract`] | PDF/DOCX text extraction |
//! | [`ingest`] | Ingestion pipeline |
//! | [`context`] | Context assembly |
//! | [`llm`] | Chat completion client |
//! | [`answer`] | Answer pipeline |
//! | [`store`] | Document and usage persistence |
//! | [`services`] | Shared service handles |
//! | [`server`] | HTTP server |
//! | [`stats`] | CLI usage reports |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod retry;
pub mod server;
pub mod services;
pub mod stats;
pub mod store;
