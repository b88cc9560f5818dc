//! In-memory [`KnowledgeStore`] implementation for tests and embedding.
//!
//! Uses a `HashMap` keyed by source path behind `std::sync::RwLock`.
//! Vector search is brute-force cosine similarity over all stored vectors;
//! keyword search counts query terms present in each chunk's `keywords`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::chunk::extract_keywords;
use crate::embedding::cosine_similarity;
use crate::models::{KnowledgeChunk, KnowledgeMatch, SourceRecord};

use super::{rank_matches, KnowledgeStore};

struct StoredSource {
    record: SourceRecord,
    chunks: Vec<KnowledgeChunk>,
}

/// In-memory knowledge store.
pub struct InMemoryStore {
    sources: RwLock<HashMap<String, StoredSource>>,
    vector_search: bool,
    writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            vector_search: true,
            writes: AtomicUsize::new(0),
        }
    }

    /// A store that reports similarity search as unavailable, mimicking a
    /// partially provisioned backend.
    pub fn without_vector_search() -> Self {
        Self {
            vector_search: false,
            ..Self::new()
        }
    }

    /// Number of mutating calls (`replace_source`, `delete_source`) so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// All chunks for one path, in `chunk_index` order.
    pub fn chunks_for(&self, source_path: &str) -> Vec<KnowledgeChunk> {
        self.read()
            .ok()
            .and_then(|s| s.get(source_path).map(|e| e.chunks.clone()))
            .unwrap_or_default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, StoredSource>>> {
        self.sources
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, StoredSource>>> {
        self.sources
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn get_source(&self, source_path: &str) -> Result<Option<SourceRecord>> {
        Ok(self.read()?.get(source_path).map(|s| s.record.clone()))
    }

    async fn list_sources(&self) -> Result<Vec<SourceRecord>> {
        let mut records: Vec<SourceRecord> =
            self.read()?.values().map(|s| s.record.clone()).collect();
        records.sort_by(|a, b| a.source_path.cmp(&b.source_path));
        Ok(records)
    }

    async fn replace_source(
        &self,
        record: &SourceRecord,
        chunks: &[KnowledgeChunk],
    ) -> Result<()> {
        let mut chunks = chunks.to_vec();
        chunks.sort_by_key(|c| c.chunk_index);
        self.write()?.insert(
            record.source_path.clone(),
            StoredSource {
                record: record.clone(),
                chunks,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_source(&self, source_path: &str) -> Result<u64> {
        let removed = self.write()?.remove(source_path);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(removed.map(|s| s.chunks.len() as u64).unwrap_or(0))
    }

    async fn similarity_search(
        &self,
        query_vec: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<KnowledgeMatch>> {
        if !self.vector_search {
            return Err(anyhow!("similarity search is not available on this store"));
        }
        let sources = self.read()?;
        let mut matches: Vec<KnowledgeMatch> = sources
            .values()
            .flat_map(|s| s.chunks.iter())
            .filter(|c| c.embedding.len() == query_vec.len())
            .filter_map(|c| {
                let sim = cosine_similarity(query_vec, &c.embedding);
                (sim >= threshold).then(|| KnowledgeMatch::scored(c.clone(), sim))
            })
            .collect();
        rank_matches(&mut matches);
        matches.truncate(limit);
        Ok(matches)
    }

    async fn keyword_search(
        &self,
        query: &str,
        exclude_paths: &[String],
        limit: usize,
    ) -> Result<Vec<KnowledgeMatch>> {
        let normalized = extract_keywords(query);
        let terms: HashSet<&str> = normalized.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let sources = self.read()?;
        let mut hits: Vec<(usize, &KnowledgeChunk)> = sources
            .values()
            .filter(|s| !exclude_paths.contains(&s.record.source_path))
            .flat_map(|s| s.chunks.iter())
            .filter_map(|c| {
                let words: HashSet<&str> = c.keywords.split_whitespace().collect();
                let score = terms.iter().filter(|t| words.contains(*t)).count();
                (score > 0).then_some((score, c))
            })
            .collect();
        hits.sort_by(|(sa, a), (sb, b)| {
            sb.cmp(sa)
                .then_with(|| a.source_path.cmp(&b.source_path))
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });

        Ok(hits
            .into_iter()
            .take(limit)
            .map(|(_, c)| KnowledgeMatch::keyword(c.clone()))
            .collect())
    }

    async fn fetch_chunks(&self, limit: usize) -> Result<Vec<KnowledgeChunk>> {
        Ok(self
            .read()?
            .values()
            .flat_map(|s| s.chunks.iter().cloned())
            .take(limit)
            .collect())
    }

    async fn supports_similarity_search(&self) -> Result<bool> {
        Ok(self.vector_search)
    }
}
