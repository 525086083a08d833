// Embeddings module
// Passage chunking and the Ollama embedding/generation adapter

pub mod chunking;
pub mod ollama;

pub use chunking::{Chunk, ChunkingConfig, reconstruct_text, split_document, split_text};
pub use ollama::OllamaClient;
