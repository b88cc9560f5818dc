//! Wiring from [`Config`] to the ingestion and retrieval components.
//!
//! Both the CLI and the HTTP server open a [`Pipeline`] and ask it for an
//! [`Ingestor`], a [`Retriever`], or an [`AnswerGenerator`]. Opening applies
//! the schema, so a fresh database works without a separate `kb init`.

use anyhow::Result;
use std::sync::Arc;

use opskb_core::answer::{AnswerGenerator, TextGenerator};
use opskb_core::embedding::EmbeddingProvider;
use opskb_core::retrieve::{RetrieveRequest, Retriever};
use opskb_core::store::KnowledgeStore;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::ingest::Ingestor;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

pub struct Pipeline {
    pub config: Arc<Config>,
    pub store: Arc<dyn KnowledgeStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

impl Pipeline {
    /// Connect to the configured database and build the embedder.
    ///
    /// Fails with a configuration error when the embedding provider cannot
    /// be built (for example, a missing API key).
    pub async fn open(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;

        Ok(Self::from_parts(
            Arc::new(config.clone()),
            Arc::new(SqliteStore::new(pool)),
            embedder,
        ))
    }

    pub fn from_parts(
        config: Arc<Config>,
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            config,
            store,
            embedder,
        }
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::from_config(&self.config, self.store.clone(), self.embedder.clone())
    }

    pub async fn retriever(&self) -> Retriever {
        Retriever::new(self.embedder.clone(), self.store.clone()).await
    }

    /// The configured answer generator. Fails when the generation provider
    /// cannot be built.
    pub fn answerer(&self) -> Result<AnswerGenerator> {
        let generator = create_generator(&self.config.generation)?;
        Ok(self.answerer_with(generator))
    }

    pub fn answerer_with(&self, generator: Arc<dyn TextGenerator>) -> AnswerGenerator {
        AnswerGenerator::new(
            generator,
            self.config.generation.temperature,
            self.config.generation.max_tokens,
        )
    }
}

/// Per-call retrieval overrides, falling back to `[retrieval]` defaults.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOverrides {
    pub limit: Option<usize>,
    pub threshold: Option<f64>,
    pub keyword: Option<bool>,
}

impl RetrievalOverrides {
    pub fn request<'a>(&self, config: &Config, query: &'a str) -> RetrieveRequest<'a> {
        RetrieveRequest {
            query,
            max_results: self.limit.unwrap_or(config.retrieval.max_results),
            similarity_threshold: self
                .threshold
                .unwrap_or(config.retrieval.similarity_threshold),
            include_keyword_search: self
                .keyword
                .unwrap_or(config.retrieval.include_keyword_search),
        }
    }
}
