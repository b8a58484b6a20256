//! Wiring of the store, loader, indexes and retriever from a [`Config`].

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::bm25::Bm25Index;
use crate::chunk::Chunker;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::error::IngestError;
use crate::extract::ContentLoader;
use crate::ingest::{IngestRequest, Ingestor, StopCheck};
use crate::migrate;
use crate::models::{Hit, IndexStatus, IngestResult};
use crate::ocr::OcrEngine;
use crate::retrieve::{HybridRetriever, RetrievalMode};
use crate::store::DocumentStore;
use crate::sync::{IndexSync, ReconcileReport, SyncOutcome};
use crate::vector::VectorIndex;

pub struct Engine {
    config: Config,
    store: DocumentStore,
    vectors: Arc<VectorIndex>,
    ingestor: Ingestor,
    retriever: HybridRetriever,
}

impl Engine {
    /// Open the engine with the embedding provider and OCR tools named in
    /// the config. Migrations are applied on open.
    pub async fn open(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let ocr = Arc::new(OcrEngine::from_config(&config.ocr));
        Self::with_ports(config, embedder, ocr).await
    }

    /// Open the engine with explicit embedding and OCR ports.
    pub async fn with_ports(
        config: Config,
        embedder: Arc<dyn Embedder>,
        ocr: Arc<OcrEngine>,
    ) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::apply(&pool)
            .await
            .context("Failed to apply schema migrations")?;
        let store = DocumentStore::new(pool);

        let bm25 = Arc::new(Bm25Index::new(&config.index.dir, config.bm25));
        let vectors = Arc::new(VectorIndex::new(&config.index.dir));
        let loader = Arc::new(ContentLoader::new(config.ocr.clone(), ocr));
        let chunker = Chunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap);

        let sync = IndexSync::new(
            store.clone(),
            Arc::clone(&bm25),
            Arc::clone(&vectors),
            Arc::clone(&embedder),
            config.embedding.batch_size,
        );
        let ingestor = Ingestor::new(
            store.clone(),
            loader,
            chunker,
            sync,
            Arc::clone(&bm25),
            Arc::clone(&vectors),
        );
        let retriever = HybridRetriever::new(
            store.clone(),
            bm25,
            Arc::clone(&vectors),
            embedder,
            config.retrieval.overfetch,
        );

        Ok(Self {
            config,
            store,
            vectors,
            ingestor,
            retriever,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub async fn ingest(
        &self,
        req: &IngestRequest,
        stop: StopCheck,
    ) -> Result<IngestResult, IngestError> {
        self.ingestor.ingest(req, stop).await
    }

    /// Query a workspace. `mode` and `k` default to `[retrieval]`.
    pub async fn query(
        &self,
        workspace_id: &str,
        text: &str,
        mode: Option<RetrievalMode>,
        k: Option<usize>,
    ) -> Result<Vec<Hit>> {
        let mode = mode.unwrap_or(self.config.retrieval.default_mode);
        let k = k.unwrap_or(self.config.retrieval.final_limit);
        self.retriever.query(workspace_id, text, mode, k).await
    }

    pub async fn delete_document(
        &self,
        workspace_id: &str,
        doc_id: &str,
    ) -> Result<Option<SyncOutcome>, IngestError> {
        self.ingestor.delete_document(workspace_id, doc_id).await
    }

    pub async fn rebuild(&self, workspace_id: &str) -> Result<ReconcileReport, IngestError> {
        self.ingestor.rebuild(workspace_id).await
    }

    pub async fn status(&self, workspace_id: &str) -> Result<IndexStatus, IngestError> {
        self.ingestor.status(workspace_id).await
    }

    pub async fn close(&self) {
        self.vectors.close().await;
        self.store.pool().close().await;
    }
}
