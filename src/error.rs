//! Error taxonomy for ingestion and retrieval.
//!
//! Extraction and chunking errors abort a single ingest call and are
//! reported verbatim. Index maintenance errors never abort ingestion; they
//! surface as [`crate::sync::SyncOutcome::Stale`] instead.

use thiserror::Error;

/// The source bytes could not be turned into readable pages.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("corrupted file: {0}")]
    Corrupted(String),

    #[error("file is encrypted")]
    Encrypted,

    #[error("file is empty")]
    Empty,

    #[error("document has no pages")]
    NoPages,

    #[error("no readable text elements found")]
    NoReadableElements,

    #[error("unsupported file type: {0}")]
    Unsupported(String),

    /// OCR was the only possible text source and it could not produce text.
    #[error("OCR required but failed: {0}")]
    OcrRequired(#[source] OcrError),

    /// The caller's stop check fired between pages.
    #[error("extraction cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone)]
pub enum OcrError {
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),

    #[error("OCR failed: {0}")]
    Failed(String),

    #[error("OCR produced no text")]
    NoText,
}

/// Errors raised by the BM25 and vector indexes.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The index artifact for the workspace does not exist (yet) or its
    /// backend cannot be reached.
    #[error("index unavailable: {0}")]
    Unavailable(String),

    #[error("index rebuild failed: {0}")]
    RebuildFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Fatal ingestion errors.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Read(#[from] ReadError),

    /// Chunking produced nothing; no document is created.
    #[error("document produced no chunks: {0}")]
    EmptyContent(String),

    #[error("ingestion cancelled")]
    Cancelled,

    #[error("invalid workspace id: {0:?}")]
    InvalidWorkspace(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    /// Index failure during an administrative rebuild, or a vector
    /// collection that could not be opened for status.
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_display() {
        assert_eq!(ReadError::Encrypted.to_string(), "file is encrypted");
        assert_eq!(
            ReadError::Unsupported("xyz".into()).to_string(),
            "unsupported file type: xyz"
        );
    }

    #[test]
    fn ocr_required_carries_reason() {
        let err = ReadError::OcrRequired(OcrError::Unavailable("no tesseract".into()));
        assert!(err.to_string().contains("no tesseract"));
    }

    #[test]
    fn ingest_error_wraps_read_error_transparently() {
        let err: IngestError = ReadError::NoPages.into();
        assert!(matches!(err, IngestError::Read(ReadError::NoPages)));
        assert_eq!(err.to_string(), "document has no pages");
    }

    #[test]
    fn index_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: IndexError = io.into();
        assert!(matches!(err, IndexError::Io(_)));
    }
}
