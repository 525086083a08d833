// Deterministic stand-ins for the model adapters, shared by unit tests

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::rag::{Embed, Generate};
use crate::{RagError, Result};

/// Embeds text as keyword counts over a fixed vocabulary
pub(crate) struct KeywordEmbedder {
    vocabulary: Vec<String>,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub(crate) fn new(vocabulary: &[&str]) -> Self {
        Self {
            vocabulary: vocabulary.iter().map(|word| (*word).to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn vector_for(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        self.vocabulary
            .iter()
            .map(|word| lowered.matches(word.as_str()).count() as f32)
            .collect()
    }
}

#[async_trait]
impl Embed for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector_for(text))
    }
}

/// Embedder whose every call fails
pub(crate) struct FailingEmbedder;

#[async_trait]
impl Embed for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::Other(anyhow::anyhow!("embedding backend offline")))
    }
}

/// Generator returning a fixed answer and recording every prompt it saw
pub(crate) struct RecordingGenerator {
    answer: String,
    prompts: Mutex<Vec<String>>,
}

impl RecordingGenerator {
    pub(crate) fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt log should not be poisoned").clone()
    }
}

#[async_trait]
impl Generate for RecordingGenerator {
    async fn generate(&self, prompt: &str, _max_new_tokens: u32) -> Result<String> {
        self.prompts
            .lock()
            .expect("prompt log should not be poisoned")
            .push(prompt.to_string());
        Ok(self.answer.clone())
    }
}
