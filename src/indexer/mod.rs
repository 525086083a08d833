// Indexer module
// The ingestion path: load, chunk, embed and upsert one document at a time


use std::path::Path;
use std::sync::Arc;

use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::validate_collection_name;
use crate::database::{VectorRecord, VectorStore};
use crate::embeddings::chunking::{ChunkingConfig, split_document};
use crate::loader::{Document, DocumentLoader, TextLoader};
use crate::rag::Embed;
use crate::{RagError, Result};

const DEFAULT_BATCH_SIZE: usize = 16;

/// Turns documents into vector records of a collection
pub struct Indexer {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embed>,
    loader: Arc<dyn DocumentLoader>,
    chunking_config: ChunkingConfig,
    batch_size: usize,
}

/// Outcome of ingesting one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub source: String,
    pub pages: usize,
    pub chunks_created: usize,
    pub records_written: usize,
}

impl Indexer {
    #[inline]
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embed>,
        chunking_config: ChunkingConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            loader: Arc::new(TextLoader),
            chunking_config,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    #[inline]
    pub fn with_loader(mut self, loader: Arc<dyn DocumentLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Number of chunk texts handed to the embedder per call
    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Load a file through the configured loader and ingest it
    #[inline]
    pub async fn ingest_path(&self, collection: &str, path: &Path) -> Result<IngestStats> {
        debug!("Loading document from {}", path.display());

        let loader = Arc::clone(&self.loader);
        let owned_path = path.to_path_buf();
        let document = tokio::task::spawn_blocking(move || loader.load(&owned_path))
            .await
            .map_err(|e| RagError::Other(anyhow::anyhow!("Document loader task failed: {}", e)))??;

        self.ingest_document(collection, &document).await
    }

    /// Chunk, embed and store a document, replacing what it held before
    ///
    /// All records are written by a single commit, so a failure in any stage
    /// leaves the collection as it was. Passages from an earlier version of
    /// the document that the new version no longer produces are removed in
    /// that same commit.
    #[inline]
    pub async fn ingest_document(&self, collection: &str, document: &Document) -> Result<IngestStats> {
        validate_collection_name(collection)
            .map_err(|e| RagError::InvalidArgument(e.to_string()))?;

        let source = document
            .pages
            .first()
            .map(|page| page.source.clone())
            .unwrap_or_default();

        let sources: Vec<String> = document
            .pages
            .iter()
            .map(|page| page.source.clone())
            .unique()
            .collect();

        let chunks = split_document(document, &self.chunking_config)?;
        if chunks.is_empty() {
            warn!("Document '{}' produced no chunks, removing its earlier passages", source);
            self.store
                .replace_documents(collection, &sources, Vec::new())
                .await?;
            return Ok(IngestStats {
                source,
                pages: document.pages.len(),
                chunks_created: 0,
                records_written: 0,
            });
        }

        let mut records = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;

            if vectors.len() != batch.len() {
                return Err(RagError::Embedding(format!(
                    "Embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }

            records.extend(
                batch
                    .iter()
                    .zip(vectors)
                    .map(|(chunk, vector)| VectorRecord::from_chunk(chunk, vector)),
            );
            debug!("Embedded batch of {} chunks from '{}'", batch.len(), source);
        }

        let records_written = self
            .store
            .replace_documents(collection, &sources, records)
            .await?;

        info!(
            "Indexed '{}' into '{}': {} pages, {} chunks",
            source,
            collection,
            document.pages.len(),
            chunks.len()
        );

        Ok(IngestStats {
            source,
            pages: document.pages.len(),
            chunks_created: chunks.len(),
            records_written,
        })
    }
}
