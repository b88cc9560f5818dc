//! Similarity + keyword retrieval.
//!
//! The retriever embeds the query, asks a [`SearchStrategy`] for ranked
//! matches, and optionally pads the result with keyword matches from
//! documents not already represented.
//!
//! # Strategy selection
//!
//! The strategy is chosen once, when the [`Retriever`] is built, from the
//! store's [`supports_similarity_search`](KnowledgeStore::supports_similarity_search)
//! probe:
//!
//! | Probe | Strategy | Result shape |
//! |-------|----------|--------------|
//! | `true` | [`VectorSearchStrategy`] | cosine ≥ threshold, descending, capped |
//! | `false` / error | [`BasicFetchStrategy`] | up to `max_results` chunks, unscored |
//!
//! Falling back is logged as a warning and is not an error.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::embedding::{self, EmbeddingProvider};
use crate::models::KnowledgeMatch;
use crate::store::KnowledgeStore;

/// Inputs for a single retrieval call.
#[derive(Debug, Clone)]
pub struct RetrieveRequest<'a> {
    pub query: &'a str,
    pub max_results: usize,
    pub similarity_threshold: f64,
    pub include_keyword_search: bool,
}

/// How the primary (non-keyword) matches are obtained.
#[async_trait]
pub trait SearchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(
        &self,
        store: &dyn KnowledgeStore,
        query_vec: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<KnowledgeMatch>>;
}

/// Delegates to the store's similarity search.
pub struct VectorSearchStrategy;

#[async_trait]
impl SearchStrategy for VectorSearchStrategy {
    fn name(&self) -> &'static str {
        "vector"
    }

    async fn search(
        &self,
        store: &dyn KnowledgeStore,
        query_vec: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<KnowledgeMatch>> {
        store.similarity_search(query_vec, threshold, limit).await
    }
}

/// Unordered fetch used when similarity search is unavailable.
pub struct BasicFetchStrategy;

#[async_trait]
impl SearchStrategy for BasicFetchStrategy {
    fn name(&self) -> &'static str {
        "basic-fetch"
    }

    async fn search(
        &self,
        store: &dyn KnowledgeStore,
        _query_vec: &[f32],
        _threshold: f64,
        limit: usize,
    ) -> Result<Vec<KnowledgeMatch>> {
        let chunks = store.fetch_chunks(limit).await?;
        Ok(chunks.into_iter().map(KnowledgeMatch::fallback).collect())
    }
}

/// Pick a strategy by probing the store once.
pub async fn select_strategy(store: &dyn KnowledgeStore) -> Box<dyn SearchStrategy> {
    match store.supports_similarity_search().await {
        Ok(true) => Box::new(VectorSearchStrategy),
        Ok(false) => {
            tracing::warn!(
                "similarity search unavailable on knowledge store; falling back to basic fetch"
            );
            Box::new(BasicFetchStrategy)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "similarity search probe failed; falling back to basic fetch"
            );
            Box::new(BasicFetchStrategy)
        }
    }
}

/// Query-time retrieval over an injected embedder and store.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn KnowledgeStore>,
    strategy: Box<dyn SearchStrategy>,
}

impl Retriever {
    /// Build a retriever, probing the store to choose a strategy.
    pub async fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn KnowledgeStore>) -> Self {
        let strategy = select_strategy(store.as_ref()).await;
        tracing::debug!(strategy = strategy.name(), "retriever ready");
        Self::with_strategy(embedder, store, strategy)
    }

    pub fn with_strategy(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn KnowledgeStore>,
        strategy: Box<dyn SearchStrategy>,
    ) -> Self {
        Self {
            embedder,
            store,
            strategy,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Retrieve at most `max_results` matches for a query.
    ///
    /// Similarity (or fallback) matches come first. When keyword search is
    /// enabled and slots remain, keyword matches fill them, skipping any
    /// `source_path` already present and admitting at most one chunk per
    /// path.
    pub async fn retrieve(&self, req: &RetrieveRequest<'_>) -> Result<Vec<KnowledgeMatch>> {
        if req.max_results == 0 || req.query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = embedding::embed(self.embedder.as_ref(), req.query).await?;

        let mut matches = self
            .strategy
            .search(
                self.store.as_ref(),
                &query_vec,
                req.similarity_threshold,
                req.max_results,
            )
            .await?;
        matches.truncate(req.max_results);

        if req.include_keyword_search && matches.len() < req.max_results {
            let padding = self.keyword_padding(req, &matches).await;
            matches.extend(padding);
        }

        matches.truncate(req.max_results);
        tracing::debug!(
            query_len = req.query.len(),
            results = matches.len(),
            strategy = self.strategy.name(),
            "retrieval complete"
        );
        Ok(matches)
    }

    async fn keyword_padding(
        &self,
        req: &RetrieveRequest<'_>,
        primary: &[KnowledgeMatch],
    ) -> Vec<KnowledgeMatch> {
        let remaining = req.max_results - primary.len();
        let mut seen: HashSet<String> = primary
            .iter()
            .map(|m| m.chunk.source_path.clone())
            .collect();

        // Represented paths are excluded in the store; each round adds at
        // least one new path, so the loop ends once the store runs dry.
        let mut padding = Vec::with_capacity(remaining);
        while padding.len() < remaining {
            let exclude: Vec<String> = seen.iter().cloned().collect();
            let wanted = (remaining - padding.len()).saturating_mul(2);
            let candidates = match self.store.keyword_search(req.query, &exclude, wanted).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, "keyword search failed; returning matches found so far");
                    break;
                }
            };
            if candidates.is_empty() {
                break;
            }
            for candidate in candidates {
                if padding.len() >= remaining {
                    break;
                }
                if seen.insert(candidate.chunk.source_path.clone()) {
                    padding.push(candidate);
                }
            }
        }
        padding
    }
}
