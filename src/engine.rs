// Engine wiring
// Builds the store, adapters and pipeline components from one Config

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::Config;
use crate::database::VectorStore;
use crate::embeddings::OllamaClient;
use crate::indexer::Indexer;
use crate::rag::{Embed, Generate, PromptAssembler, PromptTemplate, RagOrchestrator};
use crate::retrieval::Retriever;
use crate::Result;

/// Everything needed to ingest documents and answer questions
///
/// Holds no global state; each command or service builds one from its
/// configuration and hands out per-collection components.
pub struct RagEngine {
    config: Config,
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embed>,
    generator: Arc<dyn Generate>,
}

impl RagEngine {
    /// Open the vector store and connect the Ollama adapters
    #[inline]
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let client = Arc::new(OllamaClient::new(&config.ollama)?);
        let store = Arc::new(VectorStore::new(&config).await?);

        info!(
            "Engine ready (store {}, Ollama {})",
            store.path().display(),
            client.base_url()
        );
        Ok(Self::from_parts(
            config,
            store,
            Arc::clone(&client) as Arc<dyn Embed>,
            client,
        ))
    }

    /// Assemble an engine from already constructed collaborators
    #[inline]
    pub fn from_parts(
        config: Config,
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embed>,
        generator: Arc<dyn Generate>,
    ) -> Self {
        Self {
            config,
            store,
            embedder,
            generator,
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// The collection used when a caller does not name one
    #[inline]
    pub fn default_collection(&self) -> &str {
        &self.config.retrieval.default_collection
    }

    #[inline]
    pub fn indexer(&self) -> Indexer {
        Indexer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.embedder),
            self.config.chunking,
        )
        .with_batch_size(self.config.ollama.batch_size as usize)
    }

    #[inline]
    pub fn retriever(&self, collection: &str) -> Retriever {
        Retriever::new(
            Arc::clone(&self.store),
            Arc::clone(&self.embedder),
            collection,
        )
        .with_default_k(self.config.retrieval.top_k)
    }

    /// Prompt assembler for the configured template and budget
    ///
    /// A custom template that omits the grounding directive gets it prepended.
    #[inline]
    pub fn prompt_assembler(&self) -> Result<PromptAssembler> {
        let retrieval = &self.config.retrieval;
        let template = match &retrieval.prompt_template {
            Some(custom) => PromptTemplate::grounded(custom)?,
            None => PromptTemplate::default(),
        };
        Ok(PromptAssembler::new(template, retrieval.max_prompt_chars))
    }

    /// Question answering pipeline over one collection
    #[inline]
    pub fn orchestrator(&self, collection: &str) -> Result<RagOrchestrator> {
        debug!("Building answer pipeline for collection '{}'", collection);

        let retrieval = &self.config.retrieval;
        Ok(RagOrchestrator::new(
            Arc::clone(&self.embedder),
            Arc::new(self.retriever(collection)),
            Arc::new(self.prompt_assembler()?),
            Arc::clone(&self.generator),
        )
        .with_top_k(retrieval.top_k)
        .with_max_new_tokens(retrieval.max_new_tokens)
        .with_stage_timeout(Duration::from_secs(self.config.ollama.timeout_seconds)))
    }
}
