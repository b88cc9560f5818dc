//! # Ops Knowledge Base Core
//!
//! Shared, runtime-free logic for the Ops Knowledge Base: data models,
//! paragraph chunking, change detection, the embedding trait and vector
//! math, the knowledge store abstraction, retrieval, and grounded answer
//! assembly.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Concrete
//! providers and the SQLite store live in the `opskb` app crate and are
//! injected through the traits defined here.
//!
//! ```text
//! query ──▶ Retriever ──▶ SearchStrategy ──▶ KnowledgeStore
//!               │                                  ▲
//!               ▼                                  │
//!        AnswerGenerator ──▶ TextGenerator     ingestion (app)
//! ```

pub mod answer;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod hash;
pub mod models;
pub mod retrieve;
pub mod store;

pub use error::KbError;
