// LanceDB vector database module
// Handles vector storage and similarity search for embedded passages


pub mod vector_store;

use serde::{Deserialize, Serialize};

use crate::embeddings::chunking::Chunk;

/// Passage record stored in a LanceDB collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Unique identifier within the collection, `{source}-{chunk_index}` for ingested chunks
    pub id: String,
    /// The passage embedding; every record of a collection has the same length
    pub vector: Vec<f32>,
    /// The passage text handed back on retrieval
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl VectorRecord {
    /// Pair a chunk with its embedding
    #[inline]
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>) -> Self {
        Self {
            id: chunk.id(),
            vector,
            text: chunk.text.clone(),
            metadata: ChunkMetadata {
                source: chunk.source.clone(),
                page_index: chunk.page_index,
                chunk_index: chunk.chunk_index,
            },
        }
    }
}

/// Where a passage came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Origin of the document, e.g. its file path
    pub source: String,
    /// Zero-based page within the document
    pub page_index: u32,
    /// Position of the chunk among all chunks of the source
    pub chunk_index: u32,
}

/// One nearest-neighbour hit, best first in a result list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub text: String,
    pub metadata: ChunkMetadata,
    /// `1 - distance`, higher is more similar
    pub score: f32,
    /// Cosine distance to the query vector
    pub distance: f32,
}
