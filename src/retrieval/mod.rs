// Retrieval module
// Embeds a question and looks up its nearest passages in one collection


use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::database::{RetrievedPassage, VectorStore};
use crate::rag::{Embed, Retrieve};
use crate::{RagError, Result};

/// Number of passages returned when the caller does not ask for a specific count
pub const DEFAULT_TOP_K: usize = 4;

/// Nearest-neighbour lookup over a single collection
pub struct Retriever {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embed>,
    collection: String,
    default_k: usize,
}

impl Retriever {
    #[inline]
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn Embed>, collection: &str) -> Self {
        Self {
            store,
            embedder,
            collection: collection.to_string(),
            default_k: DEFAULT_TOP_K,
        }
    }

    #[inline]
    pub fn with_default_k(mut self, default_k: usize) -> Self {
        self.default_k = default_k;
        self
    }

    #[inline]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[inline]
    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Embed `question` and return up to `k` passages, best first
    ///
    /// `None` uses the retriever's default `k`.
    #[inline]
    pub async fn retrieve(&self, question: &str, k: Option<usize>) -> Result<Vec<RetrievedPassage>> {
        let k = k.unwrap_or(self.default_k);
        if k == 0 {
            return Err(RagError::InvalidArgument(
                "k must be greater than 0".to_string(),
            ));
        }

        debug!(
            "Retrieving {} passages from '{}' for question ({} chars)",
            k,
            self.collection,
            question.len()
        );
        let vector = self.embedder.embed(question).await?;
        self.retrieve_by_vector(&vector, k).await
    }
}

#[async_trait]
impl Retrieve for Retriever {
    #[inline]
    async fn retrieve_by_vector(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedPassage>> {
        self.store.query(&self.collection, vector, k).await
    }
}
