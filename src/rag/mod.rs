//! Question answering pipeline
//!
//! The orchestrator runs a fixed sequence of stages, each behind a
//! single-method trait: embed the question, retrieve passages, assemble a
//! prompt, and generate the answer.


pub mod prompt;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::database::lancedb::RetrievedPassage;
use crate::{RagError, Result};

pub use prompt::{DEFAULT_TEMPLATE, GROUNDING_DIRECTIVE, PromptAssembler, PromptTemplate};

/// Turns text into a fixed-length vector
#[async_trait]
pub trait Embed: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Looks up the passages nearest to an embedded question
#[async_trait]
pub trait Retrieve: Send + Sync {
    async fn retrieve_by_vector(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedPassage>>;
}

/// Builds the model-visible prompt from ranked passages and the question
pub trait AssemblePrompt: Send + Sync {
    fn assemble(&self, retrieved: &[RetrievedPassage], question: &str) -> Result<String>;

    /// How many of the leading ranked passages `assemble` places in the prompt
    #[inline]
    fn passages_used(&self, retrieved: &[RetrievedPassage], _question: &str) -> usize {
        retrieved.len()
    }
}

/// Runs the language model on an assembled prompt
#[async_trait]
pub trait Generate: Send + Sync {
    async fn generate(&self, prompt: &str, max_new_tokens: u32) -> Result<String>;
}

/// Progress of a single `answer` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerStage {
    Received,
    Embedded,
    Retrieved,
    Prompted,
    Generated,
    Done,
    Failed,
}

impl fmt::Display for AnswerStage {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Embedded => "embedded",
            Self::Retrieved => "retrieved",
            Self::Prompted => "prompted",
            Self::Generated => "generated",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of answering one question
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    /// Passages that went into the prompt, best first
    pub retrieved_context: Vec<RetrievedPassage>,
    pub answer_text: String,
}

/// Runs embed, retrieve, assemble and generate in order for each question
pub struct RagOrchestrator {
    embedder: Arc<dyn Embed>,
    retriever: Arc<dyn Retrieve>,
    assembler: Arc<dyn AssemblePrompt>,
    generator: Arc<dyn Generate>,
    top_k: usize,
    max_new_tokens: u32,
    stage_timeout: Option<Duration>,
}

impl RagOrchestrator {
    #[inline]
    pub fn new(
        embedder: Arc<dyn Embed>,
        retriever: Arc<dyn Retrieve>,
        assembler: Arc<dyn AssemblePrompt>,
        generator: Arc<dyn Generate>,
    ) -> Self {
        Self {
            embedder,
            retriever,
            assembler,
            generator,
            top_k: 4,
            max_new_tokens: 512,
            stage_timeout: None,
        }
    }

    #[inline]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[inline]
    pub fn with_max_new_tokens(mut self, max_new_tokens: u32) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    /// Bound the embedding and generation stages; an expired stage fails with `Timeout`
    #[inline]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    #[inline]
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Answer a question with the configured number of passages
    #[inline]
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        self.answer_with_k(question, self.top_k).await
    }

    /// Answer a question, retrieving up to `k` passages
    #[inline]
    pub async fn answer_with_k(&self, question: &str, k: usize) -> Result<Answer> {
        let mut stage = AnswerStage::Received;
        debug!("Answering question ({} chars), stage {}", question.len(), stage);

        let result = self.run_stages(question, k, &mut stage).await;
        settle(&mut stage, &result);
        result
    }

    async fn run_stages(&self, question: &str, k: usize, stage: &mut AnswerStage) -> Result<Answer> {
        let query_vector = self
            .within_deadline("embedding", self.embedder.embed(question))
            .await
            .map_err(into_embedding_error)?;
        advance(stage, AnswerStage::Embedded);

        let mut retrieved = self.retriever.retrieve_by_vector(&query_vector, k).await?;
        advance(stage, AnswerStage::Retrieved);

        let prompt = self.assembler.assemble(&retrieved, question)?;
        retrieved.truncate(self.assembler.passages_used(&retrieved, question));
        advance(stage, AnswerStage::Prompted);

        let answer_text = self
            .within_deadline(
                "generation",
                self.generator.generate(&prompt, self.max_new_tokens),
            )
            .await
            .map_err(into_generation_error)?;
        advance(stage, AnswerStage::Generated);

        let answer = Answer {
            question: question.to_string(),
            retrieved_context: retrieved,
            answer_text,
        };
        advance(stage, AnswerStage::Done);
        Ok(answer)
    }

    async fn within_deadline<T, F>(&self, operation: &str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
        T: Send,
    {
        match self.stage_timeout {
            Some(limit) => tokio::time::timeout(limit, future).await.map_err(|_| {
                RagError::Timeout(format!("{} exceeded {:?}", operation, limit))
            })?,
            None => future.await,
        }
    }
}

fn advance(stage: &mut AnswerStage, next: AnswerStage) {
    debug!("Answer stage {} -> {}", stage, next);
    *stage = next;
}

/// Move a finished call to its terminal stage and log the outcome
fn settle(stage: &mut AnswerStage, result: &Result<Answer>) {
    match result {
        Ok(answer) => info!(
            "Answered question using {} passages",
            answer.retrieved_context.len()
        ),
        Err(e) => {
            warn!("Answer failed after stage '{}': {}", stage, e);
            advance(stage, AnswerStage::Failed);
        }
    }
}

fn into_embedding_error(err: RagError) -> RagError {
    match err {
        RagError::Embedding(_) | RagError::Timeout(_) => err,
        other => RagError::Embedding(other.to_string()),
    }
}

fn into_generation_error(err: RagError) -> RagError {
    match err {
        RagError::Generation(_) | RagError::Timeout(_) => err,
        other => RagError::Generation(other.to_string()),
    }
}
