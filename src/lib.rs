//! # Ops Knowledge Base
//!
//! Ingests operational documentation (runbooks, READMEs, config notes) into
//! a SQLite knowledge store, retrieves the chunks most similar to a query,
//! and answers questions grounded in what was retrieved.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌───────────────┐
//! │ Filesystem  │──▶│ Hash ▸ Chunk ▸   │──▶│    SQLite     │
//! │ discovery   │   │ Embed ▸ Replace  │   │ chunks+vec+FTS│
//! └─────────────┘   └──────────────────┘   └──────┬────────┘
//!                                                 │
//!                              ┌──────────────────┤
//!                              ▼                  ▼
//!                        ┌──────────┐       ┌──────────┐
//!                        │ Retriever│──────▶│  Answer  │
//!                        └──────────┘       └──────────┘
//! ```
//!
//! The pipeline types and traits live in `opskb-core`; this crate binds
//! them to SQLite, HTTP providers, the filesystem, a CLI, and an HTTP API.
//!
//! ## Quick Start
//!
//! ```bash
//! kb init                          # create database
//! kb ingest                        # ingest ./ (markdown by default)
//! kb search "disk full on db-2"
//! kb ask "how do I fail over the primary?"
//! kb serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, env overrides, validation |
//! | [`connector_fs`] | Corpus discovery |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite knowledge store |
//! | [`embedding`] | OpenAI-compatible and Ollama embedders, batching |
//! | [`generation`] | OpenAI-compatible chat completions |
//! | [`ingest`] | Per-file and corpus ingestion |
//! | [`pipeline`] | Wiring from config to components |
//! | [`search`] | `search` / `ask` commands |
//! | [`server`] | HTTP API |
//! | [`stats`] | Store statistics |

pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod ingest;
pub mod migrate;
pub mod pipeline;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
