// Database module
// Vector collections persisted with LanceDB

pub mod lancedb;

pub use lancedb::{ChunkMetadata, RetrievedPassage, VectorRecord, vector_store::VectorStore};
