//! Core data models used throughout the ingestion and retrieval pipeline.
//!
//! [`Page`] is ephemeral and never persisted. [`Document`] and [`Chunk`] are
//! rows in SQLite. [`Hit`] is a transient projection built at query time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a page's (or chunk's) text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSource {
    Extract,
    Ocr,
    Mixed,
}

impl TextSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextSource::Extract => "extract",
            TextSource::Ocr => "ocr",
            TextSource::Mixed => "mixed",
        }
    }
}

impl fmt::Display for TextSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TextSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extract" => Ok(TextSource::Extract),
            "ocr" => Ok(TextSource::Ocr),
            "mixed" => Ok(TextSource::Mixed),
            other => Err(format!("unknown text source: {}", other)),
        }
    }
}

/// One page of extracted text. Page numbers are 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub number: u32,
    pub text: String,
    pub text_source: TextSource,
    pub image_count: u32,
    pub has_images: bool,
}

impl Page {
    /// A text-only page produced by native extraction.
    pub fn extracted(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
            text_source: TextSource::Extract,
            image_count: 0,
            has_images: false,
        }
    }
}

/// Persisted document row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub workspace_id: String,
    pub filename: String,
    pub path: String,
    pub content_hash: String,
    pub page_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Pages of a chunk that need special handling at citation/render time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub ocr_pages: Vec<u32>,
    pub image_pages: Vec<u32>,
}

/// A page-ranged slice of a document's text; the unit of indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// `"{doc_id}:{chunk_index}"`.
    pub id: String,
    pub doc_id: String,
    pub workspace_id: String,
    pub chunk_index: i64,
    pub page_start: u32,
    pub page_end: u32,
    pub text: String,
    pub text_source: TextSource,
    pub metadata: ChunkMetadata,
    pub created_at: i64,
}

/// Build the id of a chunk from its document id and index.
pub fn chunk_id(doc_id: &str, chunk_index: i64) -> String {
    format!("{}:{}", doc_id, chunk_index)
}

/// A chunk id with a raw or fused score, as returned by an index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f64,
}

impl ScoredChunk {
    pub fn new(chunk_id: impl Into<String>, score: f64) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            score,
        }
    }
}

/// Sort by score descending, ties broken by ascending chunk id.
pub fn rank(list: &mut [ScoredChunk]) {
    list.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

/// A scored, chunk-level search result joined with its document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub chunk_id: String,
    pub doc_id: String,
    pub workspace_id: String,
    pub filename: String,
    pub page_start: u32,
    pub page_end: u32,
    pub text: String,
    pub score: f64,
}

/// Outcome of a single ingest call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestResult {
    pub doc_id: String,
    pub page_count: i64,
    pub chunk_count: i64,
    pub skipped: bool,
}

/// Workspace-level index diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    pub doc_count: i64,
    pub chunk_count: i64,
    pub vector_count: i64,
    pub bm25_present: bool,
    pub bm25_stale: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_source_roundtrips_through_str() {
        for src in [TextSource::Extract, TextSource::Ocr, TextSource::Mixed] {
            assert_eq!(src.as_str().parse::<TextSource>().unwrap(), src);
        }
        assert!("scan".parse::<TextSource>().is_err());
    }

    #[test]
    fn rank_breaks_ties_by_chunk_id() {
        let mut list = vec![
            ScoredChunk::new("b", 1.0),
            ScoredChunk::new("c", 2.0),
            ScoredChunk::new("a", 1.0),
        ];
        rank(&mut list);
        let ids: Vec<&str> = list.iter().map(|s| s.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn chunk_id_format() {
        assert_eq!(chunk_id("abc", 3), "abc:3");
    }
}
