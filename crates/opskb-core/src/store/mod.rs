//! Storage abstraction for the knowledge base.
//!
//! The [`KnowledgeStore`] trait defines every operation the ingestion and
//! retrieval pipeline needs, enabling pluggable backends (SQLite in the app
//! crate, [`memory::InMemoryStore`] for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use std::cmp::Ordering;

use crate::models::{KnowledgeChunk, KnowledgeMatch, SourceRecord};

/// Abstract storage backend for knowledge chunks.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_source`](KnowledgeStore::get_source) | Look up the last-ingested hash for a path |
/// | [`replace_source`](KnowledgeStore::replace_source) | Atomically swap a path's chunk set |
/// | [`delete_source`](KnowledgeStore::delete_source) | Drop a path and its chunks |
/// | [`similarity_search`](KnowledgeStore::similarity_search) | Cosine search with threshold |
/// | [`keyword_search`](KnowledgeStore::keyword_search) | Full-text search over `keywords` |
/// | [`fetch_chunks`](KnowledgeStore::fetch_chunks) | Unordered fetch (degraded retrieval) |
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn get_source(&self, source_path: &str) -> Result<Option<SourceRecord>>;

    async fn list_sources(&self) -> Result<Vec<SourceRecord>>;

    /// Delete every chunk for `record.source_path`, insert `chunks`, and
    /// upsert `record`, as one unit. Readers never observe a mix of old and
    /// new chunks, nor an empty window, for that path.
    async fn replace_source(&self, record: &SourceRecord, chunks: &[KnowledgeChunk])
        -> Result<()>;

    /// Remove a path and all of its chunks. Returns the number of chunks removed.
    async fn delete_source(&self, source_path: &str) -> Result<u64>;

    /// Chunks whose cosine similarity to `query_vec` is at least `threshold`,
    /// ranked by [`rank_matches`], at most `limit` of them. Stored vectors
    /// whose length differs from `query_vec` never match.
    async fn similarity_search(
        &self,
        query_vec: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<KnowledgeMatch>>;

    /// Keyword matches over the `keywords` field, best first, unscored.
    /// Chunks from any path in `exclude_paths` are left out before `limit`
    /// is applied.
    async fn keyword_search(
        &self,
        query: &str,
        exclude_paths: &[String],
        limit: usize,
    ) -> Result<Vec<KnowledgeMatch>>;

    /// Up to `limit` chunks in no particular order.
    async fn fetch_chunks(&self, limit: usize) -> Result<Vec<KnowledgeChunk>>;

    /// Whether [`similarity_search`](KnowledgeStore::similarity_search) is
    /// available in this deployment.
    async fn supports_similarity_search(&self) -> Result<bool>;
}

/// Order matches by similarity (descending), then `source_path`, then
/// `chunk_index`, so equal scores rank deterministically. Unscored matches
/// sort after scored ones.
pub fn rank_matches(matches: &mut [KnowledgeMatch]) {
    matches.sort_by(|a, b| {
        let sa = a.similarity.unwrap_or(f64::NEG_INFINITY);
        let sb = b.similarity.unwrap_or(f64::NEG_INFINITY);
        sb.partial_cmp(&sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.source_path.cmp(&b.chunk.source_path))
            .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
    });
}
