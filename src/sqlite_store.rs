//! SQLite-backed [`KnowledgeStore`] implementation.
//!
//! Chunks, vectors, and FTS rows for a path are always written and removed
//! together inside one transaction, so a reader sees either the old chunk
//! set or the new one. Similarity search is a brute-force cosine scan over
//! `knowledge_vectors`; keyword search runs FTS5 `MATCH` over `keywords`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use opskb_core::chunk::extract_keywords;
use opskb_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use opskb_core::models::{KnowledgeChunk, KnowledgeMatch, SourceRecord, SourceType};
use opskb_core::store::{rank_matches, KnowledgeStore};

const CHUNK_COLUMNS: &str = "c.id, c.source_path, c.chunk_index, c.content, c.source_type, \
     c.source_hash, c.metadata_json, c.keywords, c.created_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn row_to_chunk(row: &SqliteRow, embedding: Vec<f32>) -> KnowledgeChunk {
    let metadata_json: String = row.get("metadata_json");
    let source_type: String = row.get("source_type");
    KnowledgeChunk {
        id: row.get("id"),
        content: row.get("content"),
        embedding,
        source_type: SourceType::parse(&source_type),
        source_path: row.get("source_path"),
        source_hash: row.get("source_hash"),
        chunk_index: row.get("chunk_index"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        keywords: row.get("keywords"),
        created_at: from_ts(row.get("created_at")),
    }
}

fn row_to_record(row: &SqliteRow) -> SourceRecord {
    let source_type: String = row.get("source_type");
    SourceRecord {
        source_path: row.get("source_path"),
        source_hash: row.get("source_hash"),
        source_type: SourceType::parse(&source_type),
        chunk_count: row.get("chunk_count"),
        embedding_model: row.get("embedding_model"),
        embedding_dims: row.get("embedding_dims"),
        updated_at: from_ts(row.get("updated_at")),
    }
}

/// Turn free text into an FTS5 expression: each term quoted, OR-joined.
/// Returns `None` when the text has no searchable terms.
pub fn fts_query(text: &str) -> Option<String> {
    let normalized = extract_keywords(text);
    let mut terms: Vec<String> = Vec::new();
    for term in normalized.split_whitespace() {
        let quoted = format!("\"{}\"", term);
        if !terms.contains(&quoted) {
            terms.push(quoted);
        }
    }
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn get_source(&self, source_path: &str) -> Result<Option<SourceRecord>> {
        let row = sqlx::query(
            "SELECT source_path, source_hash, source_type, chunk_count, embedding_model, \
                    embedding_dims, updated_at \
             FROM knowledge_sources WHERE source_path = ?",
        )
        .bind(source_path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_record))
    }

    async fn list_sources(&self) -> Result<Vec<SourceRecord>> {
        let rows = sqlx::query(
            "SELECT source_path, source_hash, source_type, chunk_count, embedding_model, \
                    embedding_dims, updated_at \
             FROM knowledge_sources ORDER BY source_path ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn replace_source(
        &self,
        record: &SourceRecord,
        chunks: &[KnowledgeChunk],
    ) -> Result<()> {
        let path = record.source_path.as_str();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM knowledge_vectors WHERE source_path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM knowledge_fts WHERE source_path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM knowledge_chunks WHERE source_path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO knowledge_chunks (id, source_path, chunk_index, content, source_type,
                                              source_hash, metadata_json, keywords, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.source_path)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(chunk.source_type.as_str())
            .bind(&chunk.source_hash)
            .bind(chunk.metadata.to_string())
            .bind(&chunk.keywords)
            .bind(chunk.created_at.timestamp())
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO knowledge_fts (chunk_id, source_path, keywords) VALUES (?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.source_path)
            .bind(&chunk.keywords)
            .execute(&mut *tx)
            .await?;

            if !chunk.embedding.is_empty() {
                sqlx::query(
                    "INSERT INTO knowledge_vectors (chunk_id, source_path, dims, embedding) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(&chunk.id)
                .bind(&chunk.source_path)
                .bind(chunk.embedding.len() as i64)
                .bind(vec_to_blob(&chunk.embedding))
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO knowledge_sources (source_path, source_hash, source_type, chunk_count,
                                           embedding_model, embedding_dims, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_path) DO UPDATE SET
                source_hash = excluded.source_hash,
                source_type = excluded.source_type,
                chunk_count = excluded.chunk_count,
                embedding_model = excluded.embedding_model,
                embedding_dims = excluded.embedding_dims,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(path)
        .bind(&record.source_hash)
        .bind(record.source_type.as_str())
        .bind(record.chunk_count)
        .bind(&record.embedding_model)
        .bind(record.embedding_dims)
        .bind(record.updated_at.timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_source(&self, source_path: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM knowledge_vectors WHERE source_path = ?")
            .bind(source_path)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM knowledge_fts WHERE source_path = ?")
            .bind(source_path)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM knowledge_chunks WHERE source_path = ?")
            .bind(source_path)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM knowledge_sources WHERE source_path = ?")
            .bind(source_path)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed)
    }

    async fn similarity_search(
        &self,
        query_vec: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<KnowledgeMatch>> {
        let sql = format!(
            "SELECT {}, v.embedding FROM knowledge_vectors v \
             JOIN knowledge_chunks c ON c.id = v.chunk_id \
             WHERE v.dims = ?",
            CHUNK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(query_vec.len() as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut matches: Vec<KnowledgeMatch> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                let similarity = cosine_similarity(query_vec, &vec);
                (similarity >= threshold)
                    .then(|| KnowledgeMatch::scored(row_to_chunk(row, vec), similarity))
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
        let Some(expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let exclusion = if exclude_paths.is_empty() {
            String::new()
        } else {
            format!(
                "AND c.source_path NOT IN ({}) ",
                vec!["?"; exclude_paths.len()].join(", ")
            )
        };
        let sql = format!(
            "SELECT {} FROM knowledge_fts f \
             JOIN knowledge_chunks c ON c.id = f.chunk_id \
             WHERE knowledge_fts MATCH ? {}\
             ORDER BY f.rank, c.source_path, c.chunk_index \
             LIMIT ?",
            CHUNK_COLUMNS, exclusion
        );
        let mut q = sqlx::query(&sql).bind(expr);
        for path in exclude_paths {
            q = q.bind(path.as_str());
        }
        let rows = q.bind(limit as i64).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| KnowledgeMatch::keyword(row_to_chunk(row, Vec::new())))
            .collect())
    }

    async fn fetch_chunks(&self, limit: usize) -> Result<Vec<KnowledgeChunk>> {
        let sql = format!(
            "SELECT {} FROM knowledge_chunks c ORDER BY c.source_path, c.chunk_index LIMIT ?",
            CHUNK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row_to_chunk(row, Vec::new())).collect())
    }

    async fn supports_similarity_search(&self) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='knowledge_vectors'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate::apply_schema;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("kb.sqlite")).await.unwrap();
        apply_schema(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn record(path: &str, hash: &str, count: i64) -> SourceRecord {
        SourceRecord {
            source_path: path.to_string(),
            source_hash: hash.to_string(),
            source_type: SourceType::Markdown,
            chunk_count: count,
            embedding_model: "test".to_string(),
            embedding_dims: 2,
            updated_at: Utc::now(),
        }
    }

    fn chunk(path: &str, index: i64, text: &str, embedding: Vec<f32>) -> KnowledgeChunk {
        KnowledgeChunk {
            id: format!("{}#{}", path, index),
            content: text.to_string(),
            embedding,
            source_type: SourceType::Markdown,
            source_path: path.to_string(),
            source_hash: "h".to_string(),
            chunk_index: index,
            metadata: serde_json::json!({ "file_name": path }),
            keywords: extract_keywords(text),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_fts_query_sanitizes() {
        assert_eq!(
            fts_query("Restart the worker? worker").as_deref(),
            Some("\"restart\" OR \"the\" OR \"worker\"")
        );
        assert_eq!(fts_query("\"*(NEAR)\"").as_deref(), Some("\"near\""));
        assert!(fts_query("  ?! ").is_none());
    }

    #[tokio::test]
    async fn test_replace_and_read_back() {
        let (_tmp, store) = store().await;
        store
            .replace_source(
                &record("docs/x.md", "h1", 2),
                &[
                    chunk("docs/x.md", 0, "Restart the worker", vec![1.0, 0.0]),
                    chunk("docs/x.md", 1, "Check the queue depth", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let rec = store.get_source("docs/x.md").await.unwrap().unwrap();
        assert_eq!(rec.source_hash, "h1");
        assert_eq!(rec.chunk_count, 2);
        assert_eq!(rec.embedding_model, "test");
        assert_eq!(rec.embedding_dims, 2);

        let all = store.fetch_chunks(10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].chunk_index, 0);
        assert_eq!(all[0].metadata["file_name"], "docs/x.md");
        assert!(store.supports_similarity_search().await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_removes_previous_chunks() {
        let (_tmp, store) = store().await;
        store
            .replace_source(
                &record("a.md", "h1", 3),
                &[
                    chunk("a.md", 0, "one", vec![1.0, 0.0]),
                    chunk("a.md", 1, "two", vec![1.0, 0.0]),
                    chunk("a.md", 2, "three", vec![1.0, 0.0]),
                ],
            )
            .await
            .unwrap();
        store
            .replace_source(
                &record("a.md", "h2", 1),
                &[chunk("a.md", 0, "fresh", vec![0.0, 1.0])],
            )
            .await
            .unwrap();

        let chunks = store.fetch_chunks(10).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "fresh");
        assert!(store.keyword_search("three", &[], 10).await.unwrap().is_empty());
        let hits = store.similarity_search(&[1.0, 0.0], 0.5, 10).await.unwrap();
        assert!(hits.is_empty(), "stale vectors survived replace");
        assert_eq!(
            store.get_source("a.md").await.unwrap().unwrap().source_hash,
            "h2"
        );
    }

    #[tokio::test]
    async fn test_similarity_search_ranks_and_filters() {
        let (_tmp, store) = store().await;
        store
            .replace_source(
                &record("b.md", "h", 2),
                &[
                    chunk("b.md", 0, "x", vec![1.0, 0.0]),
                    chunk("b.md", 1, "y", vec![0.6, 0.8]),
                ],
            )
            .await
            .unwrap();
        store
            .replace_source(
                &record("a.md", "h", 1),
                &[chunk("a.md", 0, "z", vec![2.0, 0.0])],
            )
            .await
            .unwrap();
        store
            .replace_source(
                &record("c.md", "h", 1),
                &[chunk("c.md", 0, "wrong dims", vec![1.0, 0.0, 0.0])],
            )
            .await
            .unwrap();

        let hits = store.similarity_search(&[1.0, 0.0], 0.5, 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|m| m.chunk.id.as_str()).collect();
        // a.md#0 and b.md#0 tie at 1.0; path breaks the tie.
        assert_eq!(ids, vec!["a.md#0", "b.md#0", "b.md#1"]);
        assert_eq!(hits[0].chunk.embedding, vec![2.0, 0.0]);

        let strict = store.similarity_search(&[1.0, 0.0], 0.9, 10).await.unwrap();
        assert_eq!(strict.len(), 2);
        let capped = store.similarity_search(&[1.0, 0.0], -1.0, 1).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn test_keyword_search_over_keywords() {
        let (_tmp, store) = store().await;
        store
            .replace_source(
                &record("runbooks/db.md", "h", 1),
                &[chunk("runbooks/db.md", 0, "Postgres failover: promote the replica.", vec![])],
            )
            .await
            .unwrap();
        store
            .replace_source(
                &record("runbooks/web.md", "h", 1),
                &[chunk("runbooks/web.md", 0, "Restart nginx.", vec![])],
            )
            .await
            .unwrap();

        let hits = store.keyword_search("How do I FAILOVER postgres?", &[], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.source_path, "runbooks/db.md");
        assert!(hits[0].similarity.is_none());
        assert!(store.keyword_search("???", &[], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keyword_search_excludes_paths_before_limit() {
        let (_tmp, store) = store().await;
        store
            .replace_source(
                &record("a.md", "h", 3),
                &[
                    chunk("a.md", 0, "disk full", vec![]),
                    chunk("a.md", 1, "disk full again", vec![]),
                    chunk("a.md", 2, "disk full still", vec![]),
                ],
            )
            .await
            .unwrap();
        store
            .replace_source(&record("b.md", "h", 1), &[chunk("b.md", 0, "disk quota", vec![])])
            .await
            .unwrap();
        store
            .replace_source(&record("c.md", "h", 1), &[chunk("c.md", 0, "disk cleanup", vec![])])
            .await
            .unwrap();

        let hits = store
            .keyword_search("disk", &["a.md".to_string(), "c.md".to_string()], 1)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.source_path, "b.md");
    }

    #[tokio::test]
    async fn test_delete_source() {
        let (_tmp, store) = store().await;
        store
            .replace_source(
                &record("a.md", "h", 2),
                &[
                    chunk("a.md", 0, "one", vec![1.0]),
                    chunk("a.md", 1, "two", vec![1.0]),
                ],
            )
            .await
            .unwrap();

        assert_eq!(store.delete_source("a.md").await.unwrap(), 2);
        assert!(store.get_source("a.md").await.unwrap().is_none());
        assert!(store.list_sources().await.unwrap().is_empty());
        assert!(store.keyword_search("one", &[], 10).await.unwrap().is_empty());
        assert_eq!(store.delete_source("a.md").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_similarity_support_without_schema() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("bare.sqlite")).await.unwrap();
        let store = SqliteStore::new(pool);
        assert!(!store.supports_similarity_search().await.unwrap());
    }
}
