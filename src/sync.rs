//! Keeps the BM25 and vector indexes consistent with the document store.
//!
//! Store failures are hard errors. Index failures are soft: they are
//! logged, recorded in the `index_state` ledger, and reported as
//! [`SyncOutcome::Stale`] so ingestion can proceed. The previous BM25
//! snapshot stays authoritative until the next successful rebuild, and
//! retrieval drops ids that no longer resolve to a live chunk, so a stale
//! index degrades freshness but never surfaces deleted content.
//!
//! Teardown order for a document: chunk rows, then vector point deletes,
//! then a full BM25 rebuild of the workspace.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::bm25::Bm25Index;
use crate::embedding::{embed_batched, Embedder};
use crate::error::{IndexError, IngestError};
use crate::models::Chunk;
use crate::store::{DocumentStore, IndexState};
use crate::vector::VectorIndex;

/// Result of an index maintenance step that did not hard-fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Fresh,
    /// At least one index missed the change; the reason is also recorded in
    /// the workspace's `index_state` row.
    Stale(String),
}

impl SyncOutcome {
    pub fn is_fresh(&self) -> bool {
        matches!(self, SyncOutcome::Fresh)
    }

    fn merge(self, other: SyncOutcome) -> SyncOutcome {
        match (self, other) {
            (SyncOutcome::Fresh, SyncOutcome::Fresh) => SyncOutcome::Fresh,
            (SyncOutcome::Stale(a), SyncOutcome::Fresh) => SyncOutcome::Stale(a),
            (SyncOutcome::Fresh, SyncOutcome::Stale(b)) => SyncOutcome::Stale(b),
            (SyncOutcome::Stale(a), SyncOutcome::Stale(b)) => {
                SyncOutcome::Stale(format!("{}; {}", a, b))
            }
        }
    }
}

/// Counters reported by [`IndexSync::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub embedded: usize,
    pub orphans_removed: u64,
    pub bm25_chunks: usize,
}

pub struct IndexSync {
    store: DocumentStore,
    bm25: Arc<Bm25Index>,
    vectors: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Which {
    Bm25,
    Vector,
}

impl IndexSync {
    pub fn new(
        store: DocumentStore,
        bm25: Arc<Bm25Index>,
        vectors: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            bm25,
            vectors,
            embedder,
            batch_size,
        }
    }

    /// Index freshly inserted chunks: vector upserts, then a BM25 rebuild.
    pub async fn index_chunks(
        &self,
        workspace_id: &str,
        chunks: &[Chunk],
    ) -> Result<SyncOutcome, IngestError> {
        let vector = self.embed_and_upsert(workspace_id, chunks).await;
        let vector = self.settle(workspace_id, Which::Vector, vector).await?;
        let bm25 = self.rebuild_bm25(workspace_id).await?;
        Ok(vector.merge(bm25))
    }

    /// Remove a document and everything derived from it.
    pub async fn remove_document(
        &self,
        workspace_id: &str,
        doc_id: &str,
    ) -> Result<SyncOutcome, IngestError> {
        let chunk_ids = self.store.delete_document(doc_id).await?;
        info!(workspace_id, doc_id, chunks = chunk_ids.len(), "document rows removed");

        let deleted = self
            .vectors
            .delete(workspace_id, &chunk_ids)
            .await
            .map(|_| ());
        let vector = self.settle(workspace_id, Which::Vector, deleted).await?;
        let bm25 = self.rebuild_bm25(workspace_id).await?;
        Ok(vector.merge(bm25))
    }

    /// Rebuild the workspace BM25 snapshot from the live chunk set.
    pub async fn rebuild_bm25(&self, workspace_id: &str) -> Result<SyncOutcome, IngestError> {
        let chunks = self.store.chunk_texts(workspace_id).await?;
        let result = self.bm25.rebuild(workspace_id, &chunks).await.map(|_| ());
        self.settle(workspace_id, Which::Bm25, result).await
    }

    /// Administrative repair: embed chunks missing a vector, drop vector
    /// entries whose chunk is gone, and rebuild BM25. Any index failure is
    /// returned as an error here rather than recorded as staleness.
    pub async fn reconcile(&self, workspace_id: &str) -> Result<ReconcileReport, IngestError> {
        let live = self.store.chunk_texts(workspace_id).await?;
        let live_ids: HashSet<&str> = live.iter().map(|(id, _)| id.as_str()).collect();

        let indexed: HashSet<String> = self.vectors.ids(workspace_id).await?.into_iter().collect();
        let orphans: Vec<String> = indexed
            .iter()
            .filter(|id| !live_ids.contains(id.as_str()))
            .cloned()
            .collect();
        let orphans_removed = self.vectors.delete(workspace_id, &orphans).await?;

        let missing: Vec<(String, String)> = live
            .iter()
            .filter(|(id, _)| !indexed.contains(id))
            .cloned()
            .collect();
        let mut embedded = 0;
        if self.embedder.dims() > 0 && !missing.is_empty() {
            let texts: Vec<String> = missing.iter().map(|(_, t)| t.clone()).collect();
            let vectors = embed_batched(self.embedder.as_ref(), &texts, self.batch_size)
                .await
                .map_err(|e| IndexError::RebuildFailed(e.to_string()))?;
            let entries: Vec<(String, Vec<f32>)> = missing
                .into_iter()
                .map(|(id, _)| id)
                .zip(vectors)
                .collect();
            self.vectors
                .upsert_many(workspace_id, self.embedder.model_name(), &entries)
                .await?;
            embedded = entries.len();
        }

        let bm25_chunks = self.bm25.rebuild(workspace_id, &live).await?;
        self.store
            .set_index_state(workspace_id, &IndexState::default())
            .await?;

        let report = ReconcileReport {
            embedded,
            orphans_removed,
            bm25_chunks,
        };
        info!(workspace_id, ?report, "indexes reconciled");
        Ok(report)
    }

    async fn embed_and_upsert(&self, workspace_id: &str, chunks: &[Chunk]) -> Result<(), IndexError> {
        if chunks.is_empty() || self.embedder.dims() == 0 {
            return Ok(());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(self.embedder.as_ref(), &texts, self.batch_size)
            .await
            .map_err(|e| IndexError::Unavailable(format!("embedding failed: {}", e)))?;
        let entries: Vec<(String, Vec<f32>)> =
            chunks.iter().map(|c| c.id.clone()).zip(vectors).collect();
        self.vectors
            .upsert_many(workspace_id, self.embedder.model_name(), &entries)
            .await
    }

    /// Turn an index result into an outcome and update the ledger.
    async fn settle(
        &self,
        workspace_id: &str,
        which: Which,
        result: Result<(), IndexError>,
    ) -> Result<SyncOutcome, IngestError> {
        let mut state = self.store.index_state(workspace_id).await?;
        let outcome = match result {
            Ok(()) => {
                match which {
                    Which::Bm25 => state.bm25_stale = false,
                    Which::Vector => state.vector_stale = false,
                }
                if !state.bm25_stale && !state.vector_stale {
                    state.last_error = None;
                }
                SyncOutcome::Fresh
            }
            Err(e) => {
                let label = match which {
                    Which::Bm25 => "bm25",
                    Which::Vector => "vector",
                };
                warn!(workspace_id, index = label, error = %e, "index update failed; marked stale");
                match which {
                    Which::Bm25 => state.bm25_stale = true,
                    Which::Vector => state.vector_stale = true,
                }
                let reason = format!("{}: {}", label, e);
                state.last_error = Some(reason.clone());
                SyncOutcome::Stale(reason)
            }
        };
        self.store.set_index_state(workspace_id, &state).await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_outcomes() {
        let fresh = SyncOutcome::Fresh;
        let stale = |s: &str| SyncOutcome::Stale(s.to_string());
        assert_eq!(fresh.clone().merge(SyncOutcome::Fresh), SyncOutcome::Fresh);
        assert_eq!(fresh.merge(stale("b")), stale("b"));
        assert_eq!(stale("a").merge(stale("b")), stale("a; b"));
        assert!(!stale("a").is_fresh());
    }
}
