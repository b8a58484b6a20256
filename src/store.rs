//! Document and chunk persistence, plus the new/skip/update decision.
//!
//! At most one document per `(workspace_id, content_hash)` is live; the
//! schema enforces it with a unique constraint. A document is inserted
//! together with all its chunks in one transaction, so readers never see a
//! document without chunks.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::warn;

use crate::models::{Chunk, ChunkMetadata, Document, Hit, ScoredChunk, TextSource};

/// How an incoming file reconciles with what the workspace already holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Nothing at this path or with this content: parse and insert.
    New,
    /// The workspace already holds these exact bytes.
    Skip(Document),
    /// A document exists at this path with different content; it must be
    /// torn down before the new one is inserted.
    Update(Document),
}

/// Staleness ledger row for one workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexState {
    pub bm25_stale: bool,
    pub vector_stale: bool,
    pub last_error: Option<String>,
}

#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

fn row_to_document(row: &SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        filename: row.get("filename"),
        path: row.get("path"),
        content_hash: row.get("content_hash"),
        page_count: row.get("page_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Decode a chunk row. A corrupt `text_source` or `metadata_json` column is
/// logged and replaced by its default so the chunk text stays reachable.
fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let id: String = row.get("id");
    let source: String = row.get("text_source");
    let metadata: String = row.get("metadata_json");

    let text_source = match source.parse::<TextSource>() {
        Ok(source) => source,
        Err(e) => {
            warn!(chunk_id = %id, error = %e, "unreadable text_source; using extract");
            TextSource::Extract
        }
    };
    let metadata = match serde_json::from_str(&metadata) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(chunk_id = %id, error = %e, "unreadable metadata_json; using empty metadata");
            ChunkMetadata::default()
        }
    };

    Chunk {
        id,
        doc_id: row.get("doc_id"),
        workspace_id: row.get("workspace_id"),
        chunk_index: row.get("chunk_index"),
        page_start: row.get::<i64, _>("page_start") as u32,
        page_end: row.get::<i64, _>("page_end") as u32,
        text: row.get("text"),
        text_source,
        metadata,
        created_at: row.get("created_at"),
    }
}

const DOCUMENT_COLUMNS: &str =
    "id, workspace_id, filename, path, content_hash, page_count, created_at, updated_at";

impl DocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn plan(
        &self,
        workspace_id: &str,
        path: &str,
        content_hash: &str,
    ) -> Result<Plan, sqlx::Error> {
        if let Some(existing) = self.find_by_hash(workspace_id, content_hash).await? {
            return Ok(Plan::Skip(existing));
        }

        let at_path = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE workspace_id = ? AND path = ? \
             ORDER BY updated_at DESC LIMIT 1",
            DOCUMENT_COLUMNS
        ))
        .bind(workspace_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match at_path {
            Some(row) => Plan::Update(row_to_document(&row)),
            None => Plan::New,
        })
    }

    pub async fn find_by_hash(
        &self,
        workspace_id: &str,
        content_hash: &str,
    ) -> Result<Option<Document>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE workspace_id = ? AND content_hash = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(workspace_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    pub async fn get_document(
        &self,
        workspace_id: &str,
        doc_id: &str,
    ) -> Result<Option<Document>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE workspace_id = ? AND id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(workspace_id)
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    pub async fn list_documents(&self, workspace_id: &str) -> Result<Vec<Document>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE workspace_id = ? ORDER BY created_at, id",
            DOCUMENT_COLUMNS
        ))
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    /// Insert a document and all its chunks atomically.
    pub async fn insert(&self, doc: &Document, chunks: &[Chunk]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, workspace_id, filename, path, content_hash,
                                   page_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.workspace_id)
        .bind(&doc.filename)
        .bind(&doc.path)
        .bind(&doc.content_hash)
        .bind(doc.page_count)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&mut *tx)
        .await?;

        for chunk in chunks {
            let metadata = serde_json::to_string(&chunk.metadata).unwrap_or_else(|_| "{}".into());
            sqlx::query(
                r#"
                INSERT INTO chunks (id, doc_id, workspace_id, chunk_index, page_start, page_end,
                                    text, text_source, metadata_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.doc_id)
            .bind(&chunk.workspace_id)
            .bind(chunk.chunk_index)
            .bind(chunk.page_start as i64)
            .bind(chunk.page_end as i64)
            .bind(&chunk.text)
            .bind(chunk.text_source.as_str())
            .bind(metadata)
            .bind(chunk.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Delete a document's chunk rows and then the document row. Returns the
    /// removed chunk ids.
    pub async fn delete_document(&self, doc_id: &str) -> Result<Vec<String>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let chunk_ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM chunks WHERE doc_id = ? ORDER BY chunk_index")
                .bind(doc_id)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(chunk_ids)
    }

    pub async fn chunks_for_document(&self, doc_id: &str) -> Result<Vec<Chunk>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE doc_id = ? ORDER BY chunk_index")
            .bind(doc_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    pub async fn chunk_count(&self, doc_id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE doc_id = ?")
            .bind(doc_id)
            .fetch_one(&self.pool)
            .await
    }

    /// `(chunk_id, text)` for every live chunk of the workspace, by id.
    pub async fn chunk_texts(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<(String, String)>, sqlx::Error> {
        let rows = sqlx::query("SELECT id, text FROM chunks WHERE workspace_id = ? ORDER BY id")
            .bind(workspace_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("id"), row.get("text")))
            .collect())
    }

    /// `(doc_count, chunk_count)` for a workspace.
    pub async fn counts(&self, workspace_id: &str) -> Result<(i64, i64), sqlx::Error> {
        let docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE workspace_id = ?")
            .bind(workspace_id)
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE workspace_id = ?")
            .bind(workspace_id)
            .fetch_one(&self.pool)
            .await?;
        Ok((docs, chunks))
    }

    /// Join scored chunk ids with their chunk and document rows. Order is
    /// preserved; ids with no live chunk in the workspace are dropped.
    pub async fn resolve_hits(
        &self,
        workspace_id: &str,
        scored: &[ScoredChunk],
    ) -> Result<Vec<Hit>, sqlx::Error> {
        if scored.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; scored.len()].join(", ");
        let sql = format!(
            r#"
            SELECT c.id, c.doc_id, c.workspace_id, c.page_start, c.page_end, c.text, d.filename
            FROM chunks c
            JOIN documents d ON d.id = c.doc_id
            WHERE c.workspace_id = ? AND c.id IN ({})
            "#,
            placeholders
        );

        let mut query = sqlx::query(&sql).bind(workspace_id);
        for s in scored {
            query = query.bind(&s.chunk_id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut by_id: HashMap<String, SqliteRow> = rows
            .into_iter()
            .map(|row| (row.get::<String, _>("id"), row))
            .collect();

        Ok(scored
            .iter()
            .filter_map(|s| {
                let row = by_id.remove(&s.chunk_id)?;
                Some(Hit {
                    chunk_id: s.chunk_id.clone(),
                    doc_id: row.get("doc_id"),
                    workspace_id: row.get("workspace_id"),
                    filename: row.get("filename"),
                    page_start: row.get::<i64, _>("page_start") as u32,
                    page_end: row.get::<i64, _>("page_end") as u32,
                    text: row.get("text"),
                    score: s.score,
                })
            })
            .collect())
    }

    pub async fn index_state(&self, workspace_id: &str) -> Result<IndexState, sqlx::Error> {
        let row = sqlx::query(
            "SELECT bm25_stale, vector_stale, last_error FROM index_state WHERE workspace_id = ?",
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|r| IndexState {
                bm25_stale: r.get::<i64, _>("bm25_stale") != 0,
                vector_stale: r.get::<i64, _>("vector_stale") != 0,
                last_error: r.get("last_error"),
            })
            .unwrap_or_default())
    }

    pub async fn set_index_state(
        &self,
        workspace_id: &str,
        state: &IndexState,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO index_state (workspace_id, bm25_stale, vector_stale, last_error, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(workspace_id) DO UPDATE SET
                bm25_stale = excluded.bm25_stale,
                vector_stale = excluded.vector_stale,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(workspace_id)
        .bind(state.bm25_stale as i64)
        .bind(state.vector_stale as i64)
        .bind(&state.last_error)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
