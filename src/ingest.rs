//! Ingestion: source documents → chunks → embeddings → knowledge store.
//!
//! [`Ingestor::ingest_document`] runs the per-file pipeline:
//!
//! ```text
//! hash ─▶ unchanged? ─yes─▶ Skipped
//!            │no
//!            ▼
//!         chunk ─▶ embed_batch ─▶ build chunks ─▶ replace_source (1 tx) ─▶ Success
//! ```
//!
//! Chunking and embedding finish before the store is touched, so a provider
//! failure leaves the previously stored chunk set intact. Every failure is
//! caught at the file boundary and reported as
//! [`IngestOutcome::Failed`]; a corpus run never aborts because one file
//! failed.
//!
//! Ingestions of the same `source_path` are serialized through a per-path
//! async mutex held by the [`Ingestor`].

use anyhow::Result;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use opskb_core::chunk::{chunk_content, extract_keywords};
use opskb_core::embedding::EmbeddingProvider;
use opskb_core::hash::content_hash;
use opskb_core::models::{
    IngestOutcome, IngestResult, IngestSummary, KnowledgeChunk, SourceDocument, SourceRecord,
};
use opskb_core::store::KnowledgeStore;

use crate::config::{Config, IngestConfig};
use crate::connector_fs::{self, DiscoveredFile};
use crate::embedding::embed_batch;
use crate::pipeline::Pipeline;

pub struct Ingestor {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    max_chunk_size: usize,
    batch_delay: Duration,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        max_chunk_size: usize,
        batch_delay: Duration,
    ) -> Self {
        Self {
            store,
            embedder,
            max_chunk_size,
            batch_delay,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self::new(
            store,
            embedder,
            config.chunking.max_chunk_size,
            Duration::from_millis(config.embedding.batch_delay_ms),
        )
    }

    fn path_lock(&self, source_path: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(source_path.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Ingest one document. Never returns an error: failures are reported
    /// in the result.
    pub async fn ingest_document(&self, doc: &SourceDocument, priority: bool) -> IngestResult {
        let lock = self.path_lock(&doc.path);
        let _guard = lock.lock().await;

        let outcome = match self.try_ingest(doc, priority).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(source_path = %doc.path, error = %e, "ingestion failed");
                IngestOutcome::Failed {
                    error: format!("{:#}", e),
                }
            }
        };

        match &outcome {
            IngestOutcome::Success { chunks, .. } => {
                tracing::info!(source_path = %doc.path, chunks, "ingested")
            }
            IngestOutcome::Skipped { .. } => {
                tracing::debug!(source_path = %doc.path, "unchanged; skipped")
            }
            _ => {}
        }

        IngestResult::new(doc.path.clone(), outcome)
    }

    async fn try_ingest(&self, doc: &SourceDocument, priority: bool) -> Result<IngestOutcome> {
        let source_hash = content_hash(&doc.content);

        let model = self.embedder.model_name();
        let dims = self.embedder.dims();

        if let Some(existing) = self.store.get_source(&doc.path).await? {
            if existing.is_current(&source_hash, model, dims) {
                return Ok(IngestOutcome::Skipped { source_hash });
            }
            if existing.source_hash == source_hash {
                tracing::info!(
                    source_path = %doc.path,
                    from = %existing.embedding_model,
                    to = model,
                    "embedding model changed; re-embedding"
                );
            }
        }

        let pieces = chunk_content(&doc.content, self.max_chunk_size);
        let vectors = embed_batch(self.embedder.as_ref(), &pieces, self.batch_delay).await?;

        let now = Utc::now();
        let chunk_count = pieces.len();
        let total_chars = doc.content.chars().count();
        let chunks: Vec<KnowledgeChunk> = pieces
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (content, embedding))| KnowledgeChunk {
                id: Uuid::new_v4().to_string(),
                keywords: extract_keywords(&content),
                content,
                embedding,
                source_type: doc.source_type,
                source_path: doc.path.clone(),
                source_hash: source_hash.clone(),
                chunk_index: index as i64,
                metadata: chunk_metadata(&doc.path, chunk_count, priority, total_chars),
                created_at: now,
            })
            .collect();

        let record = SourceRecord {
            source_path: doc.path.clone(),
            source_hash: source_hash.clone(),
            source_type: doc.source_type,
            chunk_count: chunk_count as i64,
            embedding_model: model.to_string(),
            embedding_dims: dims as i64,
            updated_at: now,
        };
        self.store.replace_source(&record, &chunks).await?;

        Ok(IngestOutcome::Success {
            chunks: chunk_count,
            source_hash,
        })
    }

    async fn ingest_file(&self, file: &DiscoveredFile) -> IngestResult {
        match file.read() {
            Ok(doc) => self.ingest_document(&doc, file.priority).await,
            Err(e) => {
                tracing::warn!(source_path = %file.relative_path, error = %e, "read failed");
                IngestResult::new(
                    file.relative_path.clone(),
                    IngestOutcome::Failed {
                        error: format!("{:#}", e),
                    },
                )
            }
        }
    }

    /// Ingest a single path relative to the ingest root. A path that no
    /// longer exists but is still indexed is removed. Paths outside the root
    /// or outside the discovery filters fail without touching the store.
    pub async fn ingest_path(&self, config: &IngestConfig, relative: &str) -> IngestResult {
        let file = match connector_fs::resolve(config, relative) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(source_path = %relative, error = %e, "path rejected");
                return IngestResult::new(
                    connector_fs::normalize_relative(relative),
                    IngestOutcome::Failed {
                        error: format!("{:#}", e),
                    },
                );
            }
        };
        if file.absolute_path.is_file() {
            return self.ingest_file(&file).await;
        }

        match self.store.get_source(&file.relative_path).await {
            Ok(Some(_)) => self.remove_source(&file.relative_path).await,
            Ok(None) => IngestResult::new(
                file.relative_path,
                IngestOutcome::Failed {
                    error: "file not found".to_string(),
                },
            ),
            Err(e) => IngestResult::new(
                file.relative_path,
                IngestOutcome::Failed {
                    error: format!("{:#}", e),
                },
            ),
        }
    }

    /// Drop a path and its chunks from the store.
    pub async fn remove_source(&self, source_path: &str) -> IngestResult {
        let lock = self.path_lock(source_path);
        let _guard = lock.lock().await;

        let outcome = match self.store.delete_source(source_path).await {
            Ok(chunks) => {
                tracing::info!(source_path, chunks, "removed stale source");
                IngestOutcome::Removed { chunks }
            }
            Err(e) => {
                tracing::warn!(source_path, error = %e, "removal failed");
                IngestOutcome::Failed {
                    error: format!("{:#}", e),
                }
            }
        };
        IngestResult::new(source_path, outcome)
    }

    /// Ingest the corpus under `config.root`.
    ///
    /// With `priority_only`, only `priority_files` are processed and missing
    /// ones are reported as failed. Full runs also remove indexed paths that
    /// discovery no longer finds. Returns `Err` only when discovery itself
    /// cannot run.
    pub async fn ingest_all(
        &self,
        config: &IngestConfig,
        priority_only: bool,
    ) -> Result<IngestSummary> {
        let mut summary = IngestSummary::default();

        let files = if priority_only {
            let (found, missing) = connector_fs::discover_priority(config)?;
            for path in missing {
                tracing::warn!(source_path = %path, "priority file not found");
                summary.record(IngestResult::new(
                    path,
                    IngestOutcome::Failed {
                        error: "priority file not found".to_string(),
                    },
                ));
            }
            found
        } else {
            connector_fs::discover(config)?
        };

        tracing::info!(
            root = %config.root.display(),
            files = files.len(),
            priority_only,
            "starting ingestion"
        );

        for file in &files {
            summary.record(self.ingest_file(file).await);
        }

        if !priority_only {
            let present: HashSet<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
            match self.store.list_sources().await {
                Ok(records) => {
                    for record in records {
                        if !present.contains(record.source_path.as_str()) {
                            summary.record(self.remove_source(&record.source_path).await);
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "could not list sources; skipping prune"),
            }
        }

        tracing::info!(
            success = summary.success,
            skipped = summary.skipped,
            failed = summary.failed,
            removed = summary.removed,
            chunks = summary.chunks_written,
            "ingestion complete"
        );
        Ok(summary)
    }
}

/// `kb ingest`: the whole corpus, the priority files, or one path.
pub async fn run_ingest(config: &Config, priority_only: bool, file: Option<&str>) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let ingestor = pipeline.ingestor();

    let summary = match file {
        Some(path) => {
            let mut summary = IngestSummary::default();
            summary.record(ingestor.ingest_path(&config.ingest, path).await);
            summary
        }
        None => ingestor.ingest_all(&config.ingest, priority_only).await?,
    };

    for result in &summary.results {
        match &result.outcome {
            IngestOutcome::Success { chunks, .. } => {
                println!("  ingested  {} ({} chunks)", result.source_path, chunks)
            }
            IngestOutcome::Skipped { .. } => println!("  unchanged {}", result.source_path),
            IngestOutcome::Removed { chunks } => {
                println!("  removed   {} ({} chunks)", result.source_path, chunks)
            }
            IngestOutcome::Failed { error } => {
                println!("  FAILED    {}: {}", result.source_path, error)
            }
        }
    }
    println!(
        "ingest: {} ingested, {} skipped, {} removed, {} failed, {} chunks written",
        summary.success, summary.skipped, summary.removed, summary.failed, summary.chunks_written
    );

    if summary.failed > 0 {
        anyhow::bail!("{} file(s) failed to ingest", summary.failed);
    }
    Ok(())
}

fn chunk_metadata(
    source_path: &str,
    chunk_count: usize,
    priority: bool,
    total_chars: usize,
) -> serde_json::Value {
    let path = Path::new(source_path);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let directory = path
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    serde_json::json!({
        "file_name": file_name,
        "extension": extension,
        "directory": directory,
        "chunk_count": chunk_count,
        "priority": priority,
        "total_chars": total_chars,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use opskb_core::models::SourceType;
    use opskb_core::store::memory::InMemoryStore;
    use opskb_core::KbError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Counts calls; optionally fails or stalls.
    #[derive(Default)]
    struct FakeEmbedder {
        calls: AtomicUsize,
        fail: AtomicBool,
        stall: Option<Duration>,
    }

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        fn name(&self) -> &str {
            "fake"
        }
        fn model_name(&self) -> &str {
            "fake-3"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed_request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, KbError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(d) = self.stall {
                tokio::time::sleep(d).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(KbError::embedding("fake", "HTTP 503: unavailable"));
            }
            Ok(inputs
                .iter()
                .map(|s| vec![s.chars().count() as f32, 1.0, 0.0])
                .collect())
        }
    }

    fn setup(max_chunk_size: usize) -> (Arc<InMemoryStore>, Arc<FakeEmbedder>, Ingestor) {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(FakeEmbedder::default());
        let ingestor = Ingestor::new(store.clone(), embedder.clone(), max_chunk_size, Duration::ZERO);
        (store, embedder, ingestor)
    }

    #[tokio::test]
    async fn test_unchanged_document_is_skipped() {
        let (store, embedder, ingestor) = setup(8000);
        let doc = SourceDocument::new("docs/x.md", "# Deploy\n\nRun the pipeline.");

        let first = ingestor.ingest_document(&doc, false).await;
        assert!(matches!(first.outcome, IngestOutcome::Success { chunks: 1, .. }));
        let calls = embedder.calls.load(Ordering::SeqCst);
        let writes = store.write_count();

        let second = ingestor.ingest_document(&doc, false).await;
        match second.outcome {
            IngestOutcome::Skipped { source_hash } => {
                assert_eq!(source_hash, content_hash(&doc.content))
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(embedder.calls.load(Ordering::SeqCst), calls);
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn test_changed_document_replaces_all_chunks() {
        let (store, _embedder, ingestor) = setup(4);
        let v1 = SourceDocument::new("docs/x.md", "A\n\nB\n\nC");
        let r1 = ingestor.ingest_document(&v1, false).await;
        assert!(matches!(r1.outcome, IngestOutcome::Success { chunks: 3, .. }));

        let v2 = SourceDocument::new("docs/x.md", "Z");
        let r2 = ingestor.ingest_document(&v2, false).await;
        assert!(matches!(r2.outcome, IngestOutcome::Success { chunks: 1, .. }));

        let chunks = store.chunks_for("docs/x.md");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Z");
        assert_eq!(chunks[0].source_hash, content_hash("Z"));
        let record = store.get_source("docs/x.md").await.unwrap().unwrap();
        assert_eq!(record.chunk_count, 1);
    }

    #[tokio::test]
    async fn test_chunk_records_carry_order_and_metadata() {
        let (store, _embedder, ingestor) = setup(1);
        let doc = SourceDocument::new("runbooks/db/failover.md", "A\n\nB\n\nC");
        ingestor.ingest_document(&doc, true).await;

        let chunks = store.chunks_for("runbooks/db/failover.md");
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["A", "B", "C"]);
        let indexes: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);

        let meta = &chunks[0].metadata;
        assert_eq!(meta["file_name"], "failover.md");
        assert_eq!(meta["extension"], "md");
        assert_eq!(meta["directory"], "runbooks/db");
        assert_eq!(meta["chunk_count"], 3);
        assert_eq!(meta["priority"], true);
        assert_eq!(meta["total_chars"], 7);
        assert!(chunks.iter().all(|c| c.embedding.len() == 3));
        assert!(chunks.iter().all(|c| c.source_type == SourceType::Markdown));
        assert_eq!(chunks[1].keywords, "b");
    }

    #[tokio::test]
    async fn test_embedding_failure_keeps_previous_chunks() {
        let (store, embedder, ingestor) = setup(8000);
        let v1 = SourceDocument::new("docs/x.md", "original");
        ingestor.ingest_document(&v1, false).await;

        embedder.fail.store(true, Ordering::SeqCst);
        let v2 = SourceDocument::new("docs/x.md", "edited");
        let result = ingestor.ingest_document(&v2, false).await;
        match result.outcome {
            IngestOutcome::Failed { error } => assert!(error.contains("503")),
            other => panic!("unexpected: {:?}", other),
        }

        let chunks = store.chunks_for("docs/x.md");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "original");
        let record = store.get_source("docs/x.md").await.unwrap().unwrap();
        assert_eq!(record.source_hash, content_hash("original"));
    }

    #[tokio::test]
    async fn test_empty_document_records_zero_chunks() {
        let (store, embedder, ingestor) = setup(8000);
        let doc = SourceDocument::new("empty.md", "  \n\n ");
        let result = ingestor.ingest_document(&doc, false).await;
        assert!(matches!(result.outcome, IngestOutcome::Success { chunks: 0, .. }));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            store.get_source("empty.md").await.unwrap().unwrap().chunk_count,
            0
        );
    }

    #[tokio::test]
    async fn test_same_path_ingestions_are_serialized() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(FakeEmbedder {
            stall: Some(Duration::from_millis(50)),
            ..FakeEmbedder::default()
        });
        let ingestor = Ingestor::new(store.clone(), embedder.clone(), 8000, Duration::ZERO);
        let doc = SourceDocument::new("docs/x.md", "same content");

        let (a, b) = tokio::join!(
            ingestor.ingest_document(&doc, false),
            ingestor.ingest_document(&doc, false)
        );

        let outcomes = [a.outcome, b.outcome];
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, IngestOutcome::Success { .. }))
                .count(),
            1
        );
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, IngestOutcome::Skipped { .. }))
                .count(),
            1
        );
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    fn write(root: &Path, rel: &str, body: &str) {
        let full = root.join(rel);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, body).unwrap();
    }

    #[tokio::test]
    async fn test_ingest_all_and_prune() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "a.md", "alpha");
        write(root, "docs/b.md", "beta");
        write(root, "node_modules/c.md", "vendored");
        std::fs::write(root.join("docs/bad.md"), [0xff, 0xfe, 0xfd]).unwrap();

        let config = IngestConfig {
            root: root.to_path_buf(),
            ..IngestConfig::default()
        };
        let (store, _embedder, ingestor) = setup(8000);

        let summary = ingestor.ingest_all(&config, false).await.unwrap();
        assert_eq!(summary.success, 2);
        assert_eq!(summary.failed, 1, "non-UTF-8 file fails alone");
        assert_eq!(summary.results.len(), 3);

        let again = ingestor.ingest_all(&config, false).await.unwrap();
        assert_eq!(again.skipped, 2);
        assert_eq!(again.success, 0);

        std::fs::remove_file(root.join("a.md")).unwrap();
        let pruned = ingestor.ingest_all(&config, false).await.unwrap();
        assert_eq!(pruned.removed, 1);
        assert!(store.get_source("a.md").await.unwrap().is_none());
        assert!(store.get_source("docs/b.md").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_priority_only_run() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "runbooks/oncall.md", "page the secondary");
        write(root, "other.md", "not a priority");

        let config = IngestConfig {
            root: root.to_path_buf(),
            priority_files: vec!["runbooks/oncall.md".to_string(), "gone.md".to_string()],
            ..IngestConfig::default()
        };
        let (store, _embedder, ingestor) = setup(8000);

        let summary = ingestor.ingest_all(&config, true).await.unwrap();
        assert_eq!(summary.success, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.removed, 0);
        assert!(store.get_source("other.md").await.unwrap().is_none());
        assert_eq!(
            store.chunks_for("runbooks/oncall.md")[0].metadata["priority"],
            true
        );
    }

    #[tokio::test]
    async fn test_ingest_path_removes_deleted_file() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "docs/x.md", "x");
        let config = IngestConfig {
            root: root.to_path_buf(),
            ..IngestConfig::default()
        };
        let (store, _embedder, ingestor) = setup(8000);

        let r = ingestor.ingest_path(&config, "./docs/x.md").await;
        assert_eq!(r.source_path, "docs/x.md");
        assert!(matches!(r.outcome, IngestOutcome::Success { .. }));

        std::fs::remove_file(root.join("docs/x.md")).unwrap();
        let r = ingestor.ingest_path(&config, "docs/x.md").await;
        assert_eq!(r.outcome, IngestOutcome::Removed { chunks: 1 });
        assert!(store.get_source("docs/x.md").await.unwrap().is_none());

        let r = ingestor.ingest_path(&config, "docs/x.md").await;
        assert!(matches!(r.outcome, IngestOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_ingest_path_rejects_paths_outside_filters() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        write(base, "secret.env", "API_TOKEN=hunter2");
        write(base, "outside.md", "outside the root");
        write(base, "docs/notes.env", "KEY=value");
        write(base, "docs/node_modules/pkg.md", "vendored");
        let config = IngestConfig {
            root: base.join("docs"),
            ..IngestConfig::default()
        };
        let (store, embedder, ingestor) = setup(8000);

        for path in [
            "../secret.env",
            "../outside.md",
            "notes.env",
            "node_modules/pkg.md",
        ] {
            let r = ingestor.ingest_path(&config, path).await;
            match r.outcome {
                IngestOutcome::Failed { error } => assert!(!error.is_empty()),
                other => panic!("{}: unexpected {:?}", path, other),
            }
        }

        let abs = base.join("outside.md").display().to_string();
        let r = ingestor.ingest_path(&config, &abs).await;
        assert!(matches!(r.outcome, IngestOutcome::Failed { .. }));

        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.write_count(), 0);
        assert!(store.list_sources().await.unwrap().is_empty());
    }

    /// Fixed model name and dimension.
    struct SizedEmbedder {
        model: &'static str,
        dims: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for SizedEmbedder {
        fn name(&self) -> &str {
            "sized"
        }
        fn model_name(&self) -> &str {
            self.model
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed_request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, KbError> {
            Ok(inputs.iter().map(|_| vec![1.0; self.dims]).collect())
        }
    }

    #[tokio::test]
    async fn test_embedder_change_reembeds_unchanged_document() {
        let store = Arc::new(InMemoryStore::new());
        let doc = SourceDocument::new("docs/x.md", "# Deploy\n\nRun the pipeline.");

        let small = Ingestor::new(
            store.clone(),
            Arc::new(SizedEmbedder { model: "small", dims: 3 }),
            8000,
            Duration::ZERO,
        );
        let r = small.ingest_document(&doc, false).await;
        assert!(matches!(r.outcome, IngestOutcome::Success { .. }));
        assert!(matches!(
            small.ingest_document(&doc, false).await.outcome,
            IngestOutcome::Skipped { .. }
        ));

        let large = Ingestor::new(
            store.clone(),
            Arc::new(SizedEmbedder { model: "large", dims: 4 }),
            8000,
            Duration::ZERO,
        );
        let r = large.ingest_document(&doc, false).await;
        assert!(matches!(r.outcome, IngestOutcome::Success { chunks: 1, .. }), "{:?}", r);

        let record = store.get_source("docs/x.md").await.unwrap().unwrap();
        assert_eq!(record.embedding_model, "large");
        assert_eq!(record.embedding_dims, 4);
        assert!(store.chunks_for("docs/x.md").iter().all(|c| c.embedding.len() == 4));

        let hits = store.similarity_search(&[1.0; 4], 0.5, 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        let same_model_new_dims = Ingestor::new(
            store.clone(),
            Arc::new(SizedEmbedder { model: "large", dims: 8 }),
            8000,
            Duration::ZERO,
        );
        assert!(matches!(
            same_model_new_dims.ingest_document(&doc, false).await.outcome,
            IngestOutcome::Success { .. }
        ));
    }
}
