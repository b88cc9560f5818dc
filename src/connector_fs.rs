//! Filesystem discovery for the ingestion corpus.
//!
//! Walks `[ingest].root`, prunes any directory named in `exclude_dirs`, and
//! keeps files whose extension matches the active extension set. Paths are
//! reported relative to the root with `/` separators and sorted, so runs
//! are deterministic.

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use opskb_core::models::SourceDocument;
use opskb_core::KbError;

use crate::config::IngestConfig;

/// A file selected for ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredFile {
    /// Path relative to the ingest root, `/`-separated. Used as `source_path`.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub priority: bool,
}

impl DiscoveredFile {
    pub fn read(&self) -> Result<SourceDocument> {
        let content = std::fs::read_to_string(&self.absolute_path)
            .with_context(|| format!("Failed to read {}", self.absolute_path.display()))?;
        Ok(SourceDocument::new(self.relative_path.clone(), content))
    }
}

fn check_root(config: &IngestConfig) -> Result<()> {
    if !config.root.is_dir() {
        anyhow::bail!(KbError::Configuration(format!(
            "ingest root does not exist or is not a directory: {}",
            config.root.display()
        )));
    }
    Ok(())
}

/// Normalise a configured relative path (`./a/b.md`, `a\b.md`) to `a/b.md`.
pub fn normalize_relative(path: &str) -> String {
    let unified = path.replace('\\', "/");
    unified
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn relative_string(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_extension_set(extensions: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for ext in extensions {
        let ext = ext.trim_start_matches('.');
        let glob = GlobBuilder::new(&format!("**/*.{}", ext))
            .case_insensitive(true)
            .literal_separator(true)
            .build()?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Every eligible file under the root, sorted by relative path.
pub fn discover(config: &IngestConfig) -> Result<Vec<DiscoveredFile>> {
    check_root(config)?;

    let root = &config.root;
    let extensions = build_extension_set(&config.active_extensions())?;
    let excluded: HashSet<&str> = config.exclude_dirs.iter().map(|s| s.as_str()).collect();
    let priority: HashSet<String> = config
        .priority_files
        .iter()
        .map(|p| normalize_relative(p))
        .collect();

    let walker = WalkDir::new(root)
        .follow_links(config.follow_symlinks)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_dir()
                || !excluded.contains(e.file_name().to_string_lossy().as_ref())
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = relative_string(root, entry.path());
        if !extensions.is_match(&rel) {
            continue;
        }

        files.push(DiscoveredFile {
            priority: priority.contains(&rel),
            relative_path: rel,
            absolute_path: entry.path().to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    tracing::debug!(root = %root.display(), files = files.len(), "discovery complete");
    Ok(files)
}

/// The configured priority files, in configuration order. Returns the files
/// found plus the relative paths that do not exist.
pub fn discover_priority(config: &IngestConfig) -> Result<(Vec<DiscoveredFile>, Vec<String>)> {
    check_root(config)?;

    let mut found = Vec::new();
    let mut missing = Vec::new();
    let mut seen = HashSet::new();

    for raw in &config.priority_files {
        let rel = normalize_relative(raw);
        if !seen.insert(rel.clone()) {
            continue;
        }
        match resolve(config, raw) {
            Ok(file) if file.absolute_path.is_file() => found.push(DiscoveredFile {
                priority: true,
                ..file
            }),
            Ok(_) => missing.push(rel),
            Err(e) => {
                tracing::warn!(source_path = %raw, error = %e, "priority file rejected");
                missing.push(rel);
            }
        }
    }

    Ok((found, missing))
}

fn rejected(relative: &str, reason: &str) -> anyhow::Error {
    anyhow::Error::from(KbError::InvalidInput(format!("{}: {}", relative, reason)))
}

/// Resolve one caller-supplied path against the root, whether or not it
/// exists. The path must stay inside the root, avoid excluded directories,
/// and carry an allowed extension, the same rules [`discover`] applies.
/// Violations are [`KbError::InvalidInput`].
pub fn resolve(config: &IngestConfig, relative: &str) -> Result<DiscoveredFile> {
    let unified = relative.trim().replace('\\', "/");
    if unified.starts_with('/')
        || Path::new(relative.trim()).has_root()
        || unified.contains(':')
    {
        return Err(rejected(relative, "path must be relative to the ingest root"));
    }

    let rel = normalize_relative(&unified);
    if rel.is_empty() {
        return Err(rejected(relative, "empty path"));
    }
    let segments: Vec<&str> = rel.split('/').collect();
    if segments.contains(&"..") {
        return Err(rejected(relative, "path escapes the ingest root"));
    }
    let excluded: HashSet<&str> = config.exclude_dirs.iter().map(|s| s.as_str()).collect();
    if let Some(dir) = segments[..segments.len() - 1]
        .iter()
        .find(|seg| excluded.contains(*seg))
    {
        return Err(rejected(relative, &format!("directory '{}' is excluded", dir)));
    }
    if !build_extension_set(&config.active_extensions())?.is_match(&rel) {
        return Err(rejected(relative, "extension is not ingested"));
    }

    let absolute_path = config.root.join(&rel);
    if absolute_path.exists() {
        let root = config
            .root
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", config.root.display()))?;
        let target = absolute_path
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", absolute_path.display()))?;
        if !target.starts_with(&root) {
            return Err(rejected(relative, "path escapes the ingest root"));
        }
    }

    let priority = config
        .priority_files
        .iter()
        .any(|p| normalize_relative(p) == rel);
    Ok(DiscoveredFile {
        absolute_path,
        relative_path: rel,
        priority,
    })
}
