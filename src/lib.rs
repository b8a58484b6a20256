//! # Corpus Harness
//!
//! A local document ingestion and hybrid retrieval engine.
//!
//! Files (PDF, DOCX, PPTX, HTML, plain text, images) are turned into pages,
//! with OCR filling in pages that carry little or no native text. Pages are
//! packed into overlapping, page-ranged chunks, stored in SQLite, and
//! indexed per workspace by a BM25 snapshot and a vector collection. Queries
//! fuse both rankings.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────┐   ┌───────────────┐
//! │ContentLoader │──▶│ Chunker │──▶│ DocumentStore │
//! │  (+ OCR)     │   └─────────┘   │   (SQLite)    │
//! └──────────────┘                 └──────┬────────┘
//!                                         │ IndexSync
//!                           ┌─────────────┴─────────────┐
//!                           ▼                           ▼
//!                    ┌────────────┐              ┌─────────────┐
//!                    │ BM25 index │              │ Vector index│
//!                    │ bm25.json  │              │vectors.sqlite│
//!                    └─────┬──────┘              └──────┬──────┘
//!                          └──────────┬─────────────────┘
//!                                     ▼
//!                             HybridRetriever → Hit
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! corpus init
//! corpus ingest ./papers/attention.pdf --workspace research
//! corpus search "scaled dot-product attention" --workspace research
//! corpus status --workspace research
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | Per-format page extraction and OCR policy |
//! | [`ocr`] | OCR and rasterizer ports |
//! | [`chunk`] | Paragraph-aware chunking with overlap |
//! | [`store`] | Documents, chunks, and the new/skip/update plan |
//! | [`bm25`] | Per-workspace BM25 snapshots |
//! | [`vector`] | Per-workspace vector collections |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`sync`] | Index consistency with the store |
//! | [`retrieve`] | BM25, vector, and hybrid retrieval |
//! | [`ingest`] | Ingestion pipeline |
//! | [`engine`] | Component wiring |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod bm25;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod retrieve;
pub mod store;
pub mod sync;
pub mod vector;

pub use engine::Engine;
