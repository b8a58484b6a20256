//! Per-workspace BM25 lexical index.
//!
//! The index is never updated in place. [`Bm25Index::rebuild`] computes a
//! fresh [`Bm25Snapshot`] over the workspace's live chunks, writes it to a
//! uniquely named temp file, and renames it over `<dir>/<workspace>/bm25.json`.
//! Readers therefore see either the previous snapshot or the new one, and
//! when rebuilds race the last rename wins.
//!
//! Scoring uses the Okapi formula with the non-negative IDF variant
//! `ln(1 + (N - df + 0.5) / (df + 0.5))`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::Bm25Config;
use crate::error::IndexError;
use crate::models::{rank, ScoredChunk};

const SNAPSHOT_FILE: &str = "bm25.json";
const SNAPSHOT_VERSION: u32 = 1;

/// Lowercased alphanumeric runs.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Term statistics for one workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bm25Snapshot {
    version: u32,
    k1: f64,
    b: f64,
    avgdl: f64,
    /// Token count per chunk id.
    doc_lens: BTreeMap<String, u32>,
    /// term → (chunk id, term frequency), sorted by chunk id.
    postings: BTreeMap<String, Vec<(String, u32)>>,
}

impl Bm25Snapshot {
    pub fn build<'a, I>(chunks: I, params: Bm25Config) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut doc_lens = BTreeMap::new();
        let mut postings: BTreeMap<String, Vec<(String, u32)>> = BTreeMap::new();
        let mut total_len: u64 = 0;

        for (chunk_id, text) in chunks {
            let tokens = tokenize(text);
            total_len += tokens.len() as u64;
            doc_lens.insert(chunk_id.to_string(), tokens.len() as u32);

            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for (term, count) in tf {
                postings
                    .entry(term)
                    .or_default()
                    .push((chunk_id.to_string(), count));
            }
        }

        for list in postings.values_mut() {
            list.sort();
        }

        let avgdl = if doc_lens.is_empty() {
            0.0
        } else {
            total_len as f64 / doc_lens.len() as f64
        };

        Self {
            version: SNAPSHOT_VERSION,
            k1: params.k1,
            b: params.b,
            avgdl,
            doc_lens,
            postings,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    /// Top `k` chunk ids by BM25 score.
    pub fn search(&self, query: &str, k: usize) -> Vec<ScoredChunk> {
        let n = self.doc_lens.len() as f64;
        if n == 0.0 || k == 0 {
            return Vec::new();
        }

        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();

        let mut scores: HashMap<&str, f64> = HashMap::new();
        for term in &terms {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let df = list.len() as f64;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();

            for (chunk_id, tf) in list {
                let dl = self.doc_lens.get(chunk_id).copied().unwrap_or(0) as f64;
                let tf = *tf as f64;
                let norm = if self.avgdl > 0.0 {
                    1.0 - self.b + self.b * dl / self.avgdl
                } else {
                    1.0
                };
                let score = idf * tf * (self.k1 + 1.0) / (tf + self.k1 * norm);
                *scores.entry(chunk_id.as_str()).or_insert(0.0) += score;
            }
        }

        let mut ranked: Vec<ScoredChunk> = scores
            .into_iter()
            .map(|(id, score)| ScoredChunk::new(id, score))
            .collect();
        rank(&mut ranked);
        ranked.truncate(k);
        ranked
    }
}

pub struct Bm25Index {
    root: PathBuf,
    params: Bm25Config,
}

impl Bm25Index {
    pub fn new(root: impl Into<PathBuf>, params: Bm25Config) -> Self {
        Self {
            root: root.into(),
            params,
        }
    }

    pub fn path(&self, workspace_id: &str) -> PathBuf {
        self.root.join(workspace_id).join(SNAPSHOT_FILE)
    }

    pub fn exists(&self, workspace_id: &str) -> bool {
        self.path(workspace_id).is_file()
    }

    /// Replace the workspace snapshot with one built from `chunks`
    /// (`(chunk_id, text)` pairs). Returns the number of indexed chunks.
    pub async fn rebuild(
        &self,
        workspace_id: &str,
        chunks: &[(String, String)],
    ) -> Result<usize, IndexError> {
        let snapshot = Bm25Snapshot::build(
            chunks.iter().map(|(id, text)| (id.as_str(), text.as_str())),
            self.params,
        );
        let count = snapshot.len();
        write_atomic(&self.path(workspace_id), &serde_json::to_vec(&snapshot)?)
            .await
            .map_err(|e| IndexError::RebuildFailed(format!("{}: {}", workspace_id, e)))?;
        debug!(workspace_id, chunks = count, "bm25 snapshot written");
        Ok(count)
    }

    /// Load the current snapshot. A missing file is [`IndexError::Unavailable`].
    pub async fn load(&self, workspace_id: &str) -> Result<Bm25Snapshot, IndexError> {
        let path = self.path(workspace_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::Unavailable(format!(
                    "no BM25 index for workspace {}",
                    workspace_id
                )))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn query(
        &self,
        workspace_id: &str,
        text: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let snapshot = self.load(workspace_id).await?;
        Ok(snapshot.search(text, k))
    }
}

/// Write `bytes` to `path` via a temp file in the same directory and a rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        tokio::fs::remove_file(&tmp).await.ok();
        return Err(e);
    }
    Ok(())
}
