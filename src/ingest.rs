//! Ingestion pipeline orchestration.
//!
//! One call ingests one file into one workspace:
//!
//! ```text
//! read bytes → sha256 → plan ─┬─ skip   → existing document
//!                             └─ new / update
//!                                  → load pages (blocking thread)
//!                                  → chunk
//!                                  → tear down previous version (update)
//!                                  → insert document + chunks
//!                                  → index (vectors, BM25 rebuild)
//! ```
//!
//! Extraction and chunking errors abort the call before anything is
//! written. Index maintenance failures do not; they are recorded in the
//! workspace's index state and repaired by [`Ingestor::rebuild`].

use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bm25::Bm25Index;
use crate::chunk::Chunker;
use crate::config::{is_valid_workspace_id, OcrMode};
use crate::error::{IngestError, ReadError};
use crate::extract::ContentLoader;
use crate::models::{Document, IndexStatus, IngestResult};
use crate::store::{DocumentStore, Plan};
use crate::sync::{IndexSync, ReconcileReport, SyncOutcome};
use crate::vector::VectorIndex;

/// Cooperative cancellation hook, polled between pages and before commit.
pub type StopCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// A [`StopCheck`] that never fires.
pub fn never_stop() -> StopCheck {
    Arc::new(|| false)
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub workspace_id: String,
    /// File to ingest. Its canonical form is the identity used to detect
    /// updates.
    pub path: PathBuf,
    /// Per-call override of `[ocr] mode`.
    pub ocr: Option<OcrMode>,
}

impl IngestRequest {
    pub fn new(workspace_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            path: path.into(),
            ocr: None,
        }
    }

    pub fn with_ocr(mut self, mode: OcrMode) -> Self {
        self.ocr = Some(mode);
        self
    }
}

pub struct Ingestor {
    store: DocumentStore,
    loader: Arc<ContentLoader>,
    chunker: Chunker,
    sync: IndexSync,
    bm25: Arc<Bm25Index>,
    vectors: Arc<VectorIndex>,
}

impl Ingestor {
    pub fn new(
        store: DocumentStore,
        loader: Arc<ContentLoader>,
        chunker: Chunker,
        sync: IndexSync,
        bm25: Arc<Bm25Index>,
        vectors: Arc<VectorIndex>,
    ) -> Self {
        Self {
            store,
            loader,
            chunker,
            sync,
            bm25,
            vectors,
        }
    }

    pub async fn ingest(
        &self,
        req: &IngestRequest,
        stop: StopCheck,
    ) -> Result<IngestResult, IngestError> {
        let ws = req.workspace_id.as_str();
        check_workspace(ws)?;

        let source = tokio::fs::canonicalize(&req.path).await?;
        let bytes = tokio::fs::read(&source).await?;
        let filename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = source.to_string_lossy().into_owned();
        let content_hash = hex::encode(Sha256::digest(&bytes));

        let previous = match self.store.plan(ws, &path, &content_hash).await? {
            Plan::Skip(existing) => {
                info!(workspace_id = ws, doc_id = %existing.id, path = %path, "unchanged; skipping");
                return self.skipped(existing).await;
            }
            Plan::Update(old) => Some(old),
            Plan::New => None,
        };

        let mode = req.ocr.unwrap_or(self.loader.ocr_config().mode);
        let pages = {
            let loader = Arc::clone(&self.loader);
            let filename = filename.clone();
            let stop = Arc::clone(&stop);
            tokio::task::spawn_blocking(move || loader.load(&filename, &bytes, mode, &*stop))
                .await
                .map_err(|e| IngestError::Other(format!("extraction task failed: {}", e)))?
        };
        let pages = match pages {
            Ok(pages) => pages,
            Err(ReadError::Cancelled) => {
                warn!(workspace_id = ws, path = %path, "ingestion cancelled during extraction");
                return Err(IngestError::Cancelled);
            }
            Err(e) => return Err(e.into()),
        };

        let doc_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let chunks = self.chunker.chunk(&doc_id, ws, &pages, now);
        if chunks.is_empty() {
            return Err(IngestError::EmptyContent(filename));
        }

        if stop() {
            warn!(workspace_id = ws, path = %path, "ingestion cancelled before commit");
            return Err(IngestError::Cancelled);
        }

        if let Some(old) = &previous {
            info!(workspace_id = ws, old_doc = %old.id, path = %path, "content changed; replacing");
            self.sync.remove_document(ws, &old.id).await?;
        }

        let doc = Document {
            id: doc_id,
            workspace_id: ws.to_string(),
            filename,
            path,
            content_hash,
            page_count: pages.len() as i64,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.store.insert(&doc, &chunks).await {
            if is_unique_violation(&e) {
                if let Some(existing) = self.store.find_by_hash(ws, &doc.content_hash).await? {
                    info!(workspace_id = ws, doc_id = %existing.id, "identical content committed concurrently");
                    return self.skipped(existing).await;
                }
            }
            return Err(e.into());
        }

        let outcome = self.sync.index_chunks(ws, &chunks).await?;
        info!(
            workspace_id = ws,
            doc_id = %doc.id,
            pages = doc.page_count,
            chunks = chunks.len(),
            fresh = outcome.is_fresh(),
            "document ingested"
        );

        Ok(IngestResult {
            doc_id: doc.id,
            page_count: doc.page_count,
            chunk_count: chunks.len() as i64,
            skipped: false,
        })
    }

    /// Delete a document with its chunks and index entries. Returns `None`
    /// when the workspace holds no such document.
    pub async fn delete_document(
        &self,
        workspace_id: &str,
        doc_id: &str,
    ) -> Result<Option<SyncOutcome>, IngestError> {
        check_workspace(workspace_id)?;
        if self.store.get_document(workspace_id, doc_id).await?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.sync.remove_document(workspace_id, doc_id).await?))
    }

    /// Administrative repair of both indexes for a workspace.
    pub async fn rebuild(&self, workspace_id: &str) -> Result<ReconcileReport, IngestError> {
        check_workspace(workspace_id)?;
        self.sync.reconcile(workspace_id).await
    }

    pub async fn status(&self, workspace_id: &str) -> Result<IndexStatus, IngestError> {
        check_workspace(workspace_id)?;
        let (doc_count, chunk_count) = self.store.counts(workspace_id).await?;
        let vector_count = self.vectors.count(workspace_id).await?;
        let state = self.store.index_state(workspace_id).await?;
        Ok(IndexStatus {
            doc_count,
            chunk_count,
            vector_count,
            bm25_present: self.bm25.exists(workspace_id),
            bm25_stale: state.bm25_stale,
        })
    }

    async fn skipped(&self, existing: Document) -> Result<IngestResult, IngestError> {
        let chunk_count = self.store.chunk_count(&existing.id).await?;
        Ok(IngestResult {
            doc_id: existing.id,
            page_count: existing.page_count,
            chunk_count,
            skipped: true,
        })
    }
}

fn check_workspace(workspace_id: &str) -> Result<(), IngestError> {
    if is_valid_workspace_id(workspace_id) {
        Ok(())
    } else {
        Err(IngestError::InvalidWorkspace(workspace_id.to_string()))
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}
