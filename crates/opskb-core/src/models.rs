//! Core data models for the knowledge pipeline.
//!
//! These types describe the source documents read during ingestion, the
//! persisted knowledge chunks, the matches returned by retrieval, and the
//! per-file ingestion outcomes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// Kind of source a document was read from, detected from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Markdown,
    Code,
    Config,
    Sql,
    Unknown,
}

impl SourceType {
    /// Classify a path by its (case-insensitive) extension.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "md" | "mdx" | "markdown" => SourceType::Markdown,
            "sql" => SourceType::Sql,
            "json" | "toml" | "yaml" | "yml" | "ini" | "env" => SourceType::Config,
            "rs" | "ts" | "tsx" | "js" | "jsx" | "mjs" | "py" | "go" | "java" | "rb" | "sh" => {
                SourceType::Code
            }
            _ => SourceType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Markdown => "markdown",
            SourceType::Code => "code",
            SourceType::Config => "config",
            SourceType::Sql => "sql",
            SourceType::Unknown => "unknown",
        }
    }

    /// Inverse of [`as_str`](Self::as_str). Unrecognised values map to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "markdown" => SourceType::Markdown,
            "code" => SourceType::Code,
            "config" => SourceType::Config,
            "sql" => SourceType::Sql,
            _ => SourceType::Unknown,
        }
    }
}

/// An externally-owned file, read-only to the pipeline.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Path relative to the ingestion root, using `/` separators.
    pub path: String,
    pub content: String,
    pub source_type: SourceType,
}

impl SourceDocument {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let source_type = SourceType::from_path(Path::new(&path));
        Self {
            path,
            content: content.into(),
            source_type,
        }
    }
}

/// One embeddable slice of a source document. Immutable once persisted.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeChunk {
    pub id: String,
    pub content: String,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub source_type: SourceType,
    pub source_path: String,
    /// Hash of the entire source content at ingestion time.
    pub source_hash: String,
    pub chunk_index: i64,
    pub metadata: serde_json::Value,
    pub keywords: String,
    pub created_at: DateTime<Utc>,
}

/// The per-path row that records what was last ingested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRecord {
    pub source_path: String,
    pub source_hash: String,
    pub source_type: SourceType,
    pub chunk_count: i64,
    /// Model that produced the stored vectors.
    pub embedding_model: String,
    pub embedding_dims: i64,
    pub updated_at: DateTime<Utc>,
}

impl SourceRecord {
    /// Whether the stored chunks for this path can be reused as-is: same
    /// content, embedded by the same model at the same dimension.
    pub fn is_current(&self, source_hash: &str, model: &str, dims: usize) -> bool {
        self.source_hash == source_hash
            && self.embedding_model == model
            && self.embedding_dims == dims as i64
    }
}

/// Which retrieval path produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOrigin {
    Similarity,
    Keyword,
    Fallback,
}

/// A retrieved chunk. Only similarity matches carry a score.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeMatch {
    pub chunk: KnowledgeChunk,
    pub similarity: Option<f64>,
    pub origin: MatchOrigin,
}

impl KnowledgeMatch {
    pub fn scored(chunk: KnowledgeChunk, similarity: f64) -> Self {
        Self {
            chunk,
            similarity: Some(similarity),
            origin: MatchOrigin::Similarity,
        }
    }

    pub fn keyword(chunk: KnowledgeChunk) -> Self {
        Self {
            chunk,
            similarity: None,
            origin: MatchOrigin::Keyword,
        }
    }

    pub fn fallback(chunk: KnowledgeChunk) -> Self {
        Self {
            chunk,
            similarity: None,
            origin: MatchOrigin::Fallback,
        }
    }
}

/// Outcome of ingesting one source document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IngestOutcome {
    Success { chunks: usize, source_hash: String },
    Skipped { source_hash: String },
    Failed { error: String },
    /// The path was indexed before but no longer exists in the corpus.
    Removed { chunks: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestResult {
    pub source_path: String,
    #[serde(flatten)]
    pub outcome: IngestOutcome,
}

impl IngestResult {
    pub fn new(source_path: impl Into<String>, outcome: IngestOutcome) -> Self {
        Self {
            source_path: source_path.into(),
            outcome,
        }
    }
}

/// Aggregate of a corpus ingestion run. Callers inspect `failed` rather
/// than relying on an error from the run itself.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub results: Vec<IngestResult>,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub removed: usize,
    pub chunks_written: usize,
}

impl IngestSummary {
    pub fn record(&mut self, result: IngestResult) {
        match &result.outcome {
            IngestOutcome::Success { chunks, .. } => {
                self.success += 1;
                self.chunks_written += chunks;
            }
            IngestOutcome::Skipped { .. } => self.skipped += 1,
            IngestOutcome::Failed { .. } => self.failed += 1,
            IngestOutcome::Removed { .. } => self.removed += 1,
        }
        self.results.push(result);
    }
}
