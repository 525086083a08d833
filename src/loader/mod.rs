// Document loading
// Turns a path into an ordered sequence of pages ready for chunking


use std::path::Path;

use tracing::debug;

use crate::{RagError, Result};

/// Page separator used by plain-text exports of paginated documents
pub const PAGE_BREAK: char = '\x0c';

/// One page of a loaded document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Origin identifier, e.g. the file path
    pub source: String,
    /// Zero-based position of the page within its document
    pub page_index: u32,
    pub text: String,
}

/// An ordered, immutable sequence of pages
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    pub pages: Vec<Page>,
}

impl Document {
    #[inline]
    pub fn new(pages: Vec<Page>) -> Self {
        Self { pages }
    }

    /// Build a document from page texts that all share one source
    #[inline]
    pub fn from_pages<I, S>(source: &str, pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pages = pages
            .into_iter()
            .zip(0u32..)
            .map(|(text, page_index)| Page {
                source: source.to_string(),
                page_index,
                text: text.into(),
            })
            .collect();
        Self { pages }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|page| page.text.is_empty())
    }
}

/// Source of documents for the ingestion path
pub trait DocumentLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Document>;
}

/// Loads UTF-8 text files, treating form feeds as page breaks
#[derive(Debug, Clone, Copy, Default)]
pub struct TextLoader;

impl DocumentLoader for TextLoader {
    #[inline]
    fn load(&self, path: &Path) -> Result<Document> {
        if !path.is_file() {
            return Err(RagError::NotFound(format!(
                "Document not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let source = path.to_string_lossy();
        let document = Document::from_pages(&source, content.split(PAGE_BREAK));

        debug!(
            "Loaded {} pages from {}",
            document.pages.len(),
            path.display()
        );
        Ok(document)
    }
}
