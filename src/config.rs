//! Configuration parsing, environment overrides, and validation.
//!
//! Configuration is read from a TOML file (default `./config/kb.toml`).
//! The file is optional: every section has defaults, so `kb` runs with no
//! file at all. After the file is parsed, a fixed set of `KB_*` environment
//! variables override individual keys, and the result is validated.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/kb.sqlite"
//!
//! [chunking]
//! max_chunk_size = 8000
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//!
//! [generation]
//! model = "gpt-4o-mini"
//!
//! [retrieval]
//! max_results = 5
//! similarity_threshold = 0.7
//!
//! [ingest]
//! root = "./docs"
//! priority_files = ["runbooks/oncall.md"]
//! ```
//!
//! # Environment overrides
//!
//! | Variable | Key |
//! |----------|-----|
//! | `KB_DB_PATH` | `db.path` |
//! | `KB_EMBEDDING_PROVIDER` | `embedding.provider` |
//! | `KB_EMBEDDING_MODEL` | `embedding.model` |
//! | `KB_EMBEDDING_URL` | `embedding.url` |
//! | `KB_MAX_CHUNK_SIZE` | `chunking.max_chunk_size` |
//! | `KB_GENERATION_MODEL` | `generation.model` |
//! | `KB_GENERATION_URL` | `generation.url` |
//!
//! API keys are never stored in the file; `api_key_env` names the variable
//! that holds them and is read only when a provider is constructed.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use opskb_core::KbError;

pub const DEFAULT_CONFIG_PATH: &str = "./config/kb.toml";

const EMBEDDING_PROVIDERS: &[&str] = &["openai", "ollama", "disabled"];
const GENERATION_PROVIDERS: &[&str] = &["openai", "disabled"];

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalConfig,
    pub ingest: IngestConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/kb.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Upper bound on chunk length, in characters.
    pub max_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 8000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `openai` (any OpenAI-compatible endpoint), `ollama`, or `disabled`.
    pub provider: String,
    pub model: String,
    /// Output dimension. Inferred for well-known models when omitted.
    pub dims: Option<usize>,
    /// Base URL. Defaults per provider.
    pub url: Option<String>,
    pub api_key_env: String,
    pub max_batch_size: usize,
    /// Pause between consecutive batch requests.
    pub batch_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            dims: None,
            url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_batch_size: opskb_core::embedding::DEFAULT_MAX_BATCH_SIZE,
            batch_delay_ms: 100,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    /// Configured dimension, or the known dimension of the model.
    pub fn resolved_dims(&self) -> Option<usize> {
        self.dims.or_else(|| known_model_dims(&self.model))
    }
}

/// Output dimension of commonly deployed embedding models.
pub fn known_model_dims(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        "text-embedding-ada-002" => Some(1536),
        "nomic-embed-text" => Some(768),
        "mxbai-embed-large" => Some(1024),
        "all-minilm" => Some(384),
        _ => None,
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    /// `openai` (any OpenAI-compatible chat endpoint) or `disabled`.
    pub provider: String,
    pub model: String,
    pub url: Option<String>,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.3,
            max_tokens: 1000,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub max_results: usize,
    pub similarity_threshold: f64,
    pub include_keyword_search: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            similarity_threshold: 0.7,
            include_keyword_search: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub root: PathBuf,
    /// Document extensions, without the leading dot.
    pub extensions: Vec<String>,
    pub include_code: bool,
    pub code_extensions: Vec<String>,
    /// Directory names skipped anywhere in the tree.
    pub exclude_dirs: Vec<String>,
    /// Paths relative to `root`, ingested by `--priority-only` runs.
    pub priority_files: Vec<String>,
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            extensions: strings(&["md", "mdx"]),
            include_code: false,
            code_extensions: strings(&[
                "rs", "ts", "tsx", "js", "jsx", "py", "go", "sql", "toml", "json", "yaml", "yml",
            ]),
            exclude_dirs: strings(&[
                "node_modules",
                ".git",
                "target",
                "dist",
                "build",
                ".next",
                ".cache",
                "vendor",
            ]),
            priority_files: Vec::new(),
            follow_symlinks: false,
        }
    }
}

impl IngestConfig {
    /// Extensions eligible for discovery under the current settings.
    pub fn active_extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.extensions.clone();
        if self.include_code {
            for ext in &self.code_extensions {
                if !exts.contains(ext) {
                    exts.push(ext.clone());
                }
            }
        }
        exts
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7331".to_string(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Load configuration from `path` (if it exists), apply `KB_*` environment
/// overrides, and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with overrides read through `lookup` instead of the
/// process environment.
pub fn load_config_with<F>(path: &Path, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    } else {
        tracing::debug!(path = %path.display(), "no config file; using defaults");
        Config::default()
    };

    apply_env_overrides(&mut config, lookup)?;
    validate(&config)?;
    Ok(config)
}

/// Apply `KB_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("KB_DB_PATH") {
        config.db.path = PathBuf::from(v);
    }
    if let Some(v) = lookup("KB_EMBEDDING_PROVIDER") {
        config.embedding.provider = v;
    }
    if let Some(v) = lookup("KB_EMBEDDING_MODEL") {
        config.embedding.model = v;
    }
    if let Some(v) = lookup("KB_EMBEDDING_URL") {
        config.embedding.url = Some(v);
    }
    if let Some(v) = lookup("KB_MAX_CHUNK_SIZE") {
        config.chunking.max_chunk_size = v.trim().parse().map_err(|_| {
            KbError::Configuration(format!("KB_MAX_CHUNK_SIZE is not a number: '{}'", v))
        })?;
    }
    if let Some(v) = lookup("KB_GENERATION_MODEL") {
        config.generation.model = v;
    }
    if let Some(v) = lookup("KB_GENERATION_URL") {
        config.generation.url = Some(v);
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chunk_size == 0 {
        bail!(KbError::Configuration(
            "chunking.max_chunk_size must be > 0".to_string()
        ));
    }

    if config.retrieval.max_results < 1 {
        bail!(KbError::Configuration(
            "retrieval.max_results must be >= 1".to_string()
        ));
    }

    if !(-1.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        bail!(KbError::Configuration(
            "retrieval.similarity_threshold must be in [-1.0, 1.0]".to_string()
        ));
    }

    if config.embedding.max_batch_size == 0 {
        bail!(KbError::Configuration(
            "embedding.max_batch_size must be >= 1".to_string()
        ));
    }

    if config.embedding.dims == Some(0) {
        bail!(KbError::Configuration(
            "embedding.dims must be > 0".to_string()
        ));
    }

    if !EMBEDDING_PROVIDERS.contains(&config.embedding.provider.as_str()) {
        bail!(KbError::Configuration(format!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, or disabled.",
            config.embedding.provider
        )));
    }

    if !GENERATION_PROVIDERS.contains(&config.generation.provider.as_str()) {
        bail!(KbError::Configuration(format!(
            "Unknown generation provider: '{}'. Must be openai or disabled.",
            config.generation.provider
        )));
    }

    Ok(())
}
