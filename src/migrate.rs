//! Idempotent schema creation for the knowledge store.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `knowledge_sources` | one row per ingested path: hash, type, chunk count, embedding model and dims |
//! | `knowledge_chunks` | chunk text, metadata, keywords; unique per `(source_path, chunk_index)` |
//! | `knowledge_vectors` | little-endian f32 embedding BLOB per chunk |
//! | `knowledge_fts` | FTS5 index over chunk keywords |

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create any missing tables and indexes on an open pool.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_sources (
            source_path TEXT PRIMARY KEY,
            source_hash TEXT NOT NULL,
            source_type TEXT NOT NULL,
            chunk_count INTEGER NOT NULL,
            embedding_model TEXT NOT NULL DEFAULT '',
            embedding_dims INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before embedder tracking lack these columns; the
    // empty defaults make every existing source re-embed once.
    for (column, ddl) in [
        ("embedding_model", "embedding_model TEXT NOT NULL DEFAULT ''"),
        ("embedding_dims", "embedding_dims INTEGER NOT NULL DEFAULT 0"),
    ] {
        let present: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('knowledge_sources') WHERE name = ?",
        )
        .bind(column)
        .fetch_one(pool)
        .await?;
        if !present {
            sqlx::query(&format!("ALTER TABLE knowledge_sources ADD COLUMN {}", ddl))
                .execute(pool)
                .await?;
        }
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_chunks (
            id TEXT PRIMARY KEY,
            source_path TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            source_type TEXT NOT NULL,
            source_hash TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            keywords TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            UNIQUE(source_path, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_vectors (
            chunk_id TEXT PRIMARY KEY,
            source_path TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 has no IF NOT EXISTS for virtual tables on older SQLite builds.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='knowledge_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE knowledge_fts USING fts5(
                chunk_id UNINDEXED,
                source_path UNINDEXED,
                keywords
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_knowledge_chunks_source ON knowledge_chunks(source_path)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_knowledge_vectors_source ON knowledge_vectors(source_path)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
