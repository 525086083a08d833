
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::loader::{Document, Page};
use crate::{RagError, Result};

/// A passage of page text ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The passage text, a contiguous substring of the page
    pub text: String,
    /// Origin of the page, e.g. its file path
    pub source: String,
    /// Zero-based page the passage was cut from
    pub page_index: u32,
    /// Position among all chunks of the same source
    pub chunk_index: u32,
}

impl Chunk {
    /// Stable identifier, identical across re-ingestion with the same parameters
    #[inline]
    pub fn id(&self) -> String {
        format!("{}-{}", self.source, self.chunk_index)
    }
}

/// Configuration for content chunking, measured in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum length of a chunk
    pub chunk_size: usize,
    /// Characters repeated from the end of one chunk at the start of the next
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidConfig(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Boundaries tried from coarsest to finest when picking a split point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Word,
}

const BOUNDARIES: [Boundary; 4] = [
    Boundary::Paragraph,
    Boundary::Line,
    Boundary::Sentence,
    Boundary::Word,
];

impl Boundary {
    /// Whether a chunk may end right before `chars[pos]`
    ///
    /// Splits only happen at the start of a whitespace run so no chunk is
    /// cut between two newlines of the same paragraph break. `pos` is never 0.
    fn splits_at(self, chars: &[char], pos: usize) -> bool {
        let previous = chars[pos - 1];
        match self {
            Self::Paragraph => {
                chars[pos] == '\n' && chars.get(pos + 1) == Some(&'\n') && previous != '\n'
            }
            Self::Line => chars[pos] == '\n' && previous != '\n',
            Self::Sentence => matches!(previous, '.' | '!' | '?') && chars[pos].is_whitespace(),
            Self::Word => chars[pos].is_whitespace() && !previous.is_whitespace(),
        }
    }
}

/// Split every page of a document into overlapping chunks
///
/// Chunk indices run across all pages sharing a source, so ids stay unique
/// for multi-page documents.
#[inline]
pub fn split_document(document: &Document, config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    config.validate()?;

    let mut chunks = Vec::new();
    let mut next_index: HashMap<&str, u32> = HashMap::new();

    for page in &document.pages {
        let counter = next_index.entry(page.source.as_str()).or_insert(0);
        for text in split_text(&page.text, config)? {
            chunks.push(page_chunk(page, text, *counter));
            *counter += 1;
        }
    }

    debug!(
        "Chunked {} pages into {} chunks (size {}, overlap {})",
        document.pages.len(),
        chunks.len(),
        config.chunk_size,
        config.chunk_overlap
    );

    Ok(chunks)
}

fn page_chunk(page: &Page, text: String, chunk_index: u32) -> Chunk {
    Chunk {
        text,
        source: page.source.clone(),
        page_index: page.page_index,
        chunk_index,
    }
}

/// Split a single page of text into chunks no longer than `chunk_size`
///
/// Each chunk after the first begins with the last `chunk_overlap`
/// characters of its predecessor.
#[inline]
pub fn split_text(text: &str, config: &ChunkingConfig) -> Result<Vec<String>> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let limit = start + config.chunk_size;
        if limit >= chars.len() {
            pieces.push(chars[start..].iter().collect());
            break;
        }

        let end = find_split_point(&chars, start + config.chunk_overlap, limit);
        pieces.push(chars[start..end].iter().collect());
        start = end - config.chunk_overlap;
    }

    Ok(pieces)
}

/// Pick the end of the next chunk within `(floor, limit]`
///
/// Ending past `floor` guarantees each chunk contributes text beyond the
/// overlap it inherited.
fn find_split_point(chars: &[char], floor: usize, limit: usize) -> usize {
    for boundary in BOUNDARIES {
        if let Some(pos) = ((floor + 1)..=limit)
            .rev()
            .find(|&pos| boundary.splits_at(chars, pos))
        {
            return pos;
        }
    }
    limit
}

/// Rebuild page text from its chunks by counting each overlap once
#[inline]
pub fn reconstruct_text(pieces: &[String], chunk_overlap: usize) -> String {
    let mut text = String::new();
    for (i, piece) in pieces.iter().enumerate() {
        if i == 0 {
            text.push_str(piece);
        } else {
            text.extend(piece.chars().skip(chunk_overlap));
        }
    }
    text
}
