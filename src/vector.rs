//! Per-workspace vector index.
//!
//! Each workspace owns one SQLite file, `<dir>/<workspace>/vectors.sqlite`,
//! holding one row per chunk id. Embeddings are stored as little-endian
//! `f32` BLOBs and ranked by brute-force cosine similarity.
//!
//! A workspace without a collection is a valid empty state: queries return
//! nothing and `count` returns zero, and neither creates the file.

use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::IndexError;
use crate::models::{rank, ScoredChunk};

const COLLECTION_FILE: &str = "vectors.sqlite";

pub struct VectorIndex {
    root: PathBuf,
    pools: Mutex<HashMap<String, SqlitePool>>,
}

impl VectorIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self, workspace_id: &str) -> PathBuf {
        self.root.join(workspace_id).join(COLLECTION_FILE)
    }

    /// Pool for the workspace collection. With `create = false` an absent
    /// collection yields `None`.
    async fn pool(&self, workspace_id: &str, create: bool) -> Result<Option<SqlitePool>, IndexError> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(workspace_id) {
            return Ok(Some(pool.clone()));
        }

        let path = self.path(workspace_id);
        if !create && !path.is_file() {
            return Ok(None);
        }

        let pool = db::connect_file(&path, 4)
            .await
            .map_err(|e| IndexError::Unavailable(format!("{}: {}", path.display(), e)))?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vectors (
                chunk_id TEXT PRIMARY KEY,
                model TEXT NOT NULL,
                dims INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        debug!(workspace_id, path = %path.display(), "opened vector collection");
        pools.insert(workspace_id.to_string(), pool.clone());
        Ok(Some(pool))
    }

    pub async fn upsert(
        &self,
        workspace_id: &str,
        chunk_id: &str,
        model: &str,
        embedding: &[f32],
    ) -> Result<(), IndexError> {
        self.upsert_many(
            workspace_id,
            model,
            &[(chunk_id.to_string(), embedding.to_vec())],
        )
        .await
    }

    /// Upsert a batch of `(chunk_id, embedding)` pairs in one transaction.
    pub async fn upsert_many(
        &self,
        workspace_id: &str,
        model: &str,
        entries: &[(String, Vec<f32>)],
    ) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }
        let Some(pool) = self.pool(workspace_id, true).await? else {
            return Err(IndexError::Unavailable(workspace_id.to_string()));
        };
        let now = chrono::Utc::now().timestamp();

        let mut tx = pool.begin().await?;
        for (chunk_id, embedding) in entries {
            sqlx::query(
                r#"
                INSERT INTO vectors (chunk_id, model, dims, embedding, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    model = excluded.model,
                    dims = excluded.dims,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(chunk_id)
            .bind(model)
            .bind(embedding.len() as i64)
            .bind(vec_to_blob(embedding))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Point-delete entries by chunk id. Returns the number of rows removed.
    pub async fn delete(&self, workspace_id: &str, chunk_ids: &[String]) -> Result<u64, IndexError> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }
        let Some(pool) = self.pool(workspace_id, false).await? else {
            return Ok(0);
        };

        let mut removed = 0;
        let mut tx = pool.begin().await?;
        for chunk_id in chunk_ids {
            removed += sqlx::query("DELETE FROM vectors WHERE chunk_id = ?")
                .bind(chunk_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    /// Top `k` chunk ids by cosine similarity to `embedding`.
    pub async fn query(
        &self,
        workspace_id: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let Some(pool) = self.pool(workspace_id, false).await? else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query("SELECT chunk_id, embedding FROM vectors")
            .fetch_all(&pool)
            .await?;

        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(embedding, &blob_to_vec(&blob)) as f64;
                ScoredChunk::new(row.get::<String, _>("chunk_id"), similarity)
            })
            .collect();

        rank(&mut scored);
        scored.truncate(k);
        Ok(scored)
    }

    pub async fn count(&self, workspace_id: &str) -> Result<i64, IndexError> {
        let Some(pool) = self.pool(workspace_id, false).await? else {
            return Ok(0);
        };
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
            .fetch_one(&pool)
            .await?)
    }

    /// Every chunk id with an entry.
    pub async fn ids(&self, workspace_id: &str) -> Result<Vec<String>, IndexError> {
        let Some(pool) = self.pool(workspace_id, false).await? else {
            return Ok(Vec::new());
        };
        Ok(sqlx::query_scalar("SELECT chunk_id FROM vectors ORDER BY chunk_id")
            .fetch_all(&pool)
            .await?)
    }

    pub async fn close(&self) {
        let mut pools = self.pools.lock().await;
        for (_, pool) in pools.drain() {
            pool.close().await;
        }
    }
}
