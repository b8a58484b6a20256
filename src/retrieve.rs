//! Hybrid retrieval over the BM25 and vector indexes.
//!
//! # Modes
//!
//! | Mode | Source |
//! |------|--------|
//! | `bm25` | BM25 index only |
//! | `vector` | embedding of the query against the vector index only |
//! | `hybrid` | both, fused |
//!
//! # Fusion
//!
//! Every mode asks its index for `k * overfetch` candidates. Candidates
//! whose chunk no longer exists in the store are dropped before the list is
//! cut to `k`, so a stale snapshot does not shorten the result.
//!
//! In hybrid mode each list is min-max normalized to `[0, 1]` on its own (a
//! list whose scores are all equal, including a single-element list,
//! normalizes to `1.0`), and every candidate gets
//!
//! ```text
//! fused = 0.5 * bm25_norm + 0.5 * vector_norm
//! ```
//!
//! with a missing component counted as `0`. Results are sorted by fused
//! score descending, ties broken by ascending chunk id, and cut to `k`.
//!
//! If either list is empty (no data, index unavailable, or embedding
//! failure) hybrid returns the other list unchanged, which makes it rank
//! exactly like the corresponding single mode.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::bm25::Bm25Index;
use crate::config::is_valid_workspace_id;
use crate::embedding::{embed_query, Embedder};
use crate::models::{rank, Hit, ScoredChunk};
use crate::store::DocumentStore;
use crate::vector::VectorIndex;

pub const BM25_WEIGHT: f64 = 0.5;
pub const VECTOR_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    Vector,
    Bm25,
    #[default]
    Hybrid,
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RetrievalMode::Vector => "vector",
            RetrievalMode::Bm25 => "bm25",
            RetrievalMode::Hybrid => "hybrid",
        })
    }
}

impl FromStr for RetrievalMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vector" => Ok(RetrievalMode::Vector),
            "bm25" => Ok(RetrievalMode::Bm25),
            "hybrid" => Ok(RetrievalMode::Hybrid),
            other => anyhow::bail!(
                "Unknown retrieval mode: {}. Use vector, bm25, or hybrid.",
                other
            ),
        }
    }
}

/// Min-max normalize scores to `[0, 1]`, preserving order.
pub fn normalize_scores(list: &[ScoredChunk]) -> Vec<ScoredChunk> {
    if list.is_empty() {
        return Vec::new();
    }

    let s_min = list.iter().map(|c| c.score).fold(f64::INFINITY, f64::min);
    let s_max = list.iter().map(|c| c.score).fold(f64::NEG_INFINITY, f64::max);

    list.iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.score - s_min) / (s_max - s_min)
            };
            ScoredChunk::new(c.chunk_id.clone(), norm)
        })
        .collect()
}

/// Fuse two ranked lists. An empty side yields the other list unchanged.
pub fn fuse(bm25: &[ScoredChunk], vector: &[ScoredChunk]) -> Vec<ScoredChunk> {
    if bm25.is_empty() {
        return vector.to_vec();
    }
    if vector.is_empty() {
        return bm25.to_vec();
    }

    let mut fused: HashMap<String, f64> = HashMap::new();
    for c in normalize_scores(bm25) {
        *fused.entry(c.chunk_id).or_insert(0.0) += BM25_WEIGHT * c.score;
    }
    for c in normalize_scores(vector) {
        *fused.entry(c.chunk_id).or_insert(0.0) += VECTOR_WEIGHT * c.score;
    }

    let mut out: Vec<ScoredChunk> = fused
        .into_iter()
        .map(|(id, score)| ScoredChunk::new(id, score))
        .collect();
    rank(&mut out);
    out
}

pub struct HybridRetriever {
    store: DocumentStore,
    bm25: Arc<Bm25Index>,
    vectors: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    overfetch: usize,
}

impl HybridRetriever {
    pub fn new(
        store: DocumentStore,
        bm25: Arc<Bm25Index>,
        vectors: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        overfetch: usize,
    ) -> Self {
        Self {
            store,
            bm25,
            vectors,
            embedder,
            overfetch: overfetch.max(1),
        }
    }

    /// Ranked hits for `text`. Only store failures are errors; an empty or
    /// unavailable index contributes nothing.
    pub async fn query(
        &self,
        workspace_id: &str,
        text: &str,
        mode: RetrievalMode,
        k: usize,
    ) -> Result<Vec<Hit>> {
        if !is_valid_workspace_id(workspace_id) {
            anyhow::bail!("invalid workspace id: {:?}", workspace_id);
        }
        if text.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        // Snapshot ids may no longer resolve, so every mode over-fetches and
        // the cut to `k` happens after resolution.
        let n = k.saturating_mul(self.overfetch);
        let ranked = match mode {
            RetrievalMode::Bm25 => self.bm25_candidates(workspace_id, text, n).await,
            RetrievalMode::Vector => self.vector_candidates(workspace_id, text, n).await,
            RetrievalMode::Hybrid => {
                let bm25 = self.bm25_candidates(workspace_id, text, n).await;
                let vector = self.vector_candidates(workspace_id, text, n).await;
                debug!(
                    workspace_id,
                    bm25 = bm25.len(),
                    vector = vector.len(),
                    "hybrid candidates"
                );
                fuse(&bm25, &vector)
            }
        };

        let mut hits = self.store.resolve_hits(workspace_id, &ranked).await?;
        if hits.len() < ranked.len() {
            debug!(
                workspace_id,
                dropped = ranked.len() - hits.len(),
                "candidates without a live chunk"
            );
        }
        hits.truncate(k);
        Ok(hits)
    }

    async fn bm25_candidates(&self, workspace_id: &str, text: &str, n: usize) -> Vec<ScoredChunk> {
        match self.bm25.query(workspace_id, text, n).await {
            Ok(list) => list,
            Err(e) => {
                warn!(workspace_id, error = %e, "BM25 index unavailable; treating as empty");
                Vec::new()
            }
        }
    }

    async fn vector_candidates(&self, workspace_id: &str, text: &str, n: usize) -> Vec<ScoredChunk> {
        if self.embedder.dims() == 0 {
            debug!(workspace_id, "embeddings disabled; vector side empty");
            return Vec::new();
        }
        let embedding = match embed_query(self.embedder.as_ref(), text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(workspace_id, error = %e, "query embedding failed; vector side empty");
                return Vec::new();
            }
        };
        match self.vectors.query(workspace_id, &embedding, n).await {
            Ok(list) => list,
            Err(e) => {
                warn!(workspace_id, error = %e, "vector index unavailable; treating as empty");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[(&str, f64)]) -> Vec<ScoredChunk> {
        items.iter().map(|(id, s)| ScoredChunk::new(*id, *s)).collect()
    }

    fn ids(list: &[ScoredChunk]) -> Vec<&str> {
        list.iter().map(|c| c.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_single() {
        let result = normalize_scores(&list(&[("c1", 5.0)]));
        assert!((result[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_range() {
        let result = normalize_scores(&list(&[("c1", 10.0), ("c2", 5.0), ("c3", 0.0)]));
        assert!((result[0].score - 1.0).abs() < 1e-9);
        assert!((result[1].score - 0.5).abs() < 1e-9);
        assert!((result[2].score - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        let result = normalize_scores(&list(&[("c1", 3.0), ("c2", 3.0)]));
        for c in &result {
            assert!((c.score - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_fused_score_is_equal_weighted_sum() {
        let bm25 = list(&[("a", 10.0), ("b", 6.0), ("c", 2.0)]);
        let vector = list(&[("b", 0.9), ("c", 0.5), ("d", 0.1)]);
        let fused = fuse(&bm25, &vector);
        let score = |id: &str| fused.iter().find(|c| c.chunk_id == id).unwrap().score;

        // bm25 norm: a=1, b=0.5, c=0; vector norm: b=1, c=0.5, d=0
        assert!((score("a") - 0.5).abs() < 1e-9);
        assert!((score("b") - 0.75).abs() < 1e-9);
        assert!((score("c") - 0.25).abs() < 1e-9);
        assert!((score("d") - 0.0).abs() < 1e-9);
        assert_eq!(ids(&fused), vec!["b", "a", "c", "d"]);
    }

    #[test]
    fn test_fuse_ties_broken_by_chunk_id() {
        let bm25 = list(&[("x", 2.0), ("y", 1.0)]);
        let vector = list(&[("y", 2.0), ("x", 1.0)]);
        let fused = fuse(&bm25, &vector);
        assert_eq!(ids(&fused), vec!["x", "y"]);
        assert!((fused[0].score - fused[1].score).abs() < 1e-9);
    }

    #[test]
    fn test_fuse_with_empty_side_returns_other_unchanged() {
        let bm25 = list(&[("a", 7.5), ("b", 3.0)]);
        assert_eq!(fuse(&bm25, &[]), bm25);
        assert_eq!(fuse(&[], &bm25), bm25);
        assert!(fuse(&[], &[]).is_empty());
    }

    #[test]
    fn test_mode_parse_and_display() {
        for mode in [RetrievalMode::Vector, RetrievalMode::Bm25, RetrievalMode::Hybrid] {
            assert_eq!(mode.to_string().parse::<RetrievalMode>().unwrap(), mode);
        }
        assert!("keyword".parse::<RetrievalMode>().is_err());
    }
}
