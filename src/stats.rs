//! Knowledge base statistics.
//!
//! A quick summary of what's indexed: source, chunk and vector counts, a
//! per-source-type breakdown, and the configured embedding model. Used by
//! `kb stats` to confirm that ingestion and embedding are working.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::migrate;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeStats {
    pub source_type: String,
    pub sources: i64,
    pub chunks: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct KbStats {
    pub sources: i64,
    pub chunks: i64,
    pub vectors: i64,
    pub by_type: Vec<TypeStats>,
    /// Unix seconds of the most recent ingestion, if any.
    pub last_updated: Option<i64>,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<KbStats> {
    let sources: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_sources")
        .fetch_one(pool)
        .await?;
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_chunks")
        .fetch_one(pool)
        .await?;
    let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_vectors")
        .fetch_one(pool)
        .await?;
    let last_updated: Option<i64> =
        sqlx::query_scalar("SELECT MAX(updated_at) FROM knowledge_sources")
            .fetch_one(pool)
            .await?;

    let rows = sqlx::query(
        r#"
        SELECT source_type, COUNT(*) AS sources, SUM(chunk_count) AS chunks
        FROM knowledge_sources
        GROUP BY source_type
        ORDER BY sources DESC, source_type ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let by_type = rows
        .iter()
        .map(|row| TypeStats {
            source_type: row.get("source_type"),
            sources: row.get("sources"),
            chunks: row.get("chunks"),
        })
        .collect();

    Ok(KbStats {
        sources,
        chunks,
        vectors,
        by_type,
        last_updated,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;
    let stats = collect_stats(&pool).await?;
    pool.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Ops Knowledge Base Stats");
    println!("========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!(
        "  Model:       {} ({})",
        config.embedding.model, config.embedding.provider
    );
    println!();
    println!("  Sources:     {}", stats.sources);
    println!("  Chunks:      {}", stats.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.vectors,
        stats.chunks,
        if stats.chunks > 0 {
            (stats.vectors * 100) / stats.chunks
        } else {
            0
        }
    );
    println!(
        "  Updated:     {}",
        match stats.last_updated {
            Some(ts) => format_ts_relative(ts),
            None => "never".to_string(),
        }
    );

    if !stats.by_type.is_empty() {
        println!();
        println!("  By type:");
        println!("  {:<12} {:>8} {:>8}", "TYPE", "SOURCES", "CHUNKS");
        println!("  {}", "-".repeat(30));
        for t in &stats.by_type {
            println!("  {:<12} {:>8} {:>8}", t.source_type, t.sources, t.chunks);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
