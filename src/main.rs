//! # Corpus Harness CLI (`corpus`)
//!
//! Thin administrative surface over the library: initialize the store,
//! ingest files into a workspace, search, inspect, delete, and repair
//! indexes.
//!
//! ## Usage
//!
//! ```bash
//! corpus --config ./config/corpus.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `corpus init` | Create the SQLite database and run schema migrations |
//! | `corpus ingest <path> --workspace <id>` | Ingest one file |
//! | `corpus search "<query>" --workspace <id>` | Search a workspace |
//! | `corpus get <doc_id> --workspace <id>` | Print a document and its chunks |
//! | `corpus delete <doc_id> --workspace <id>` | Delete a document |
//! | `corpus rebuild --workspace <id>` | Re-embed missing vectors and rebuild BM25 |
//! | `corpus status --workspace <id>` | Document, chunk, and index counts |
//!
//! Logs go to stderr and are filtered by `RUST_LOG`
//! (default `corpus_harness=info`).

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use corpus_harness::config::{self, OcrMode};
use corpus_harness::ingest::{IngestRequest, StopCheck};
use corpus_harness::migrate;
use corpus_harness::retrieve::RetrievalMode;
use corpus_harness::Engine;

/// Corpus Harness CLI: document ingestion and hybrid retrieval.
#[derive(Parser)]
#[command(
    name = "corpus",
    about = "Corpus Harness: document ingestion and hybrid (BM25 + vector) retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/corpus.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Ingest one file into a workspace.
    ///
    /// Identical content already in the workspace is skipped. Changed
    /// content at the same path replaces the previous version.
    Ingest {
        /// File to ingest.
        path: PathBuf,

        #[arg(long)]
        workspace: String,

        /// Override `[ocr] mode`: `off`, `auto`, or `on`.
        #[arg(long)]
        ocr: Option<OcrMode>,
    },

    /// Search a workspace.
    Search {
        query: String,

        #[arg(long)]
        workspace: String,

        /// `bm25`, `vector`, or `hybrid`. Defaults to `[retrieval] default_mode`.
        #[arg(long)]
        mode: Option<RetrievalMode>,

        /// Maximum number of results. Defaults to `[retrieval] final_limit`.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print a document's metadata and chunks.
    Get {
        doc_id: String,

        #[arg(long)]
        workspace: String,
    },

    /// Delete a document, its chunks, and its index entries.
    Delete {
        doc_id: String,

        #[arg(long)]
        workspace: String,
    },

    /// Repair a workspace's indexes.
    ///
    /// Embeds chunks that have no vector, removes vectors whose chunk is
    /// gone, and rebuilds the BM25 snapshot.
    Rebuild {
        #[arg(long)]
        workspace: String,
    },

    /// Show document, chunk, and index counts for a workspace.
    Status {
        #[arg(long)]
        workspace: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("corpus_harness=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Stop check that fires once Ctrl-C has been received.
fn ctrl_c_stop_check() -> StopCheck {
    let stopped = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stopped);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::SeqCst);
        }
    });
    Arc::new(move || stopped.load(Ordering::SeqCst))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let engine = Engine::open(cfg).await?;
    let result = run(&engine, cli.command).await;
    engine.close().await;
    result
}

async fn run(engine: &Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Init => {}
        Commands::Ingest {
            path,
            workspace,
            ocr,
        } => {
            let mut req = IngestRequest::new(&workspace, &path);
            req.ocr = ocr;
            let result = engine.ingest(&req, ctrl_c_stop_check()).await?;

            println!("ingest {}", path.display());
            println!("  workspace: {}", workspace);
            println!("  doc_id: {}", result.doc_id);
            println!("  pages: {}", result.page_count);
            println!("  chunks: {}", result.chunk_count);
            println!("  skipped: {}", result.skipped);
            println!("ok");
        }
        Commands::Search {
            query,
            workspace,
            mode,
            limit,
        } => {
            let hits = engine.query(&workspace, &query, mode, limit).await?;
            if hits.is_empty() {
                println!("No results.");
                return Ok(());
            }
            for (i, hit) in hits.iter().enumerate() {
                println!("{}. [{:.4}] {}", i + 1, hit.score, hit.filename);
                println!("    pages: {}-{}", hit.page_start, hit.page_end);
                println!("    excerpt: \"{}\"", excerpt(&hit.text, 200));
                println!("    chunk: {}", hit.chunk_id);
                println!();
            }
        }
        Commands::Get { doc_id, workspace } => {
            let Some(doc) = engine.store().get_document(&workspace, &doc_id).await? else {
                bail!("Document not found: {}", doc_id);
            };
            let chunks = engine.store().chunks_for_document(&doc.id).await?;

            println!("--- Document ---");
            println!("id:           {}", doc.id);
            println!("workspace:    {}", doc.workspace_id);
            println!("filename:     {}", doc.filename);
            println!("path:         {}", doc.path);
            println!("content_hash: {}", doc.content_hash);
            println!("pages:        {}", doc.page_count);
            println!("created_at:   {}", format_ts_iso(doc.created_at));
            println!("updated_at:   {}", format_ts_iso(doc.updated_at));
            println!();

            println!("--- Chunks ({}) ---", chunks.len());
            for chunk in &chunks {
                println!(
                    "[chunk {}] pages {}-{} ({})",
                    chunk.chunk_index, chunk.page_start, chunk.page_end, chunk.text_source
                );
                println!("{}", chunk.text);
                println!();
            }
        }
        Commands::Delete { doc_id, workspace } => {
            match engine.delete_document(&workspace, &doc_id).await? {
                Some(outcome) => {
                    println!("delete {}", doc_id);
                    println!("  indexes fresh: {}", outcome.is_fresh());
                    println!("ok");
                }
                None => bail!("Document not found: {}", doc_id),
            }
        }
        Commands::Rebuild { workspace } => {
            let report = engine.rebuild(&workspace).await?;
            println!("rebuild {}", workspace);
            println!("  embedded: {}", report.embedded);
            println!("  orphans removed: {}", report.orphans_removed);
            println!("  bm25 chunks: {}", report.bm25_chunks);
            println!("ok");
        }
        Commands::Status { workspace } => {
            let status = engine.status(&workspace).await?;
            println!("status {}", workspace);
            println!("  documents: {}", status.doc_count);
            println!("  chunks: {}", status.chunk_count);
            println!("  vectors: {}", status.vector_count);
            println!("  bm25 present: {}", status.bm25_present);
            println!("  bm25 stale: {}", status.bm25_stale);
            println!("ok");
        }
    }
    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        return flat.to_string();
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
