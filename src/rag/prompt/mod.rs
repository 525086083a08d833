#[cfg(test)]
mod tests;

use itertools::Itertools;
use tracing::debug;

use super::AssemblePrompt;
use crate::database::lancedb::RetrievedPassage;
use crate::{RagError, Result};

/// Instruction keeping the model inside the supplied context
pub const GROUNDING_DIRECTIVE: &str = "Use only the following pieces of context to answer the question at the end. \
If the context does not contain the answer, say that you don't know and that the answer is not in the provided context. \
Do not make up an answer.";

/// Template used when the configuration does not supply one
pub const DEFAULT_TEMPLATE: &str = "Use only the following pieces of context to answer the question at the end. \
If the context does not contain the answer, say that you don't know and that the answer is not in the provided context. \
Do not make up an answer.\n\n\
Context:\n{context}\n\n\
Question: {question}\n\
Helpful Answer:";

/// Separator placed between passages in the rendered context
pub const PASSAGE_DELIMITER: &str = "\n\n";

const CONTEXT_SLOT: &str = "{context}";
const QUESTION_SLOT: &str = "{question}";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Context,
    Question,
}

/// A prompt template with `{context}` and `{question}` slots
///
/// The template is parsed once, so slot markers appearing inside passages
/// or the question are never substituted a second time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
    literal_chars: usize,
    context_slots: usize,
    question_slots: usize,
}

impl PromptTemplate {
    #[inline]
    pub fn parse(template: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = template;

        while !rest.is_empty() {
            let next_slot = [(CONTEXT_SLOT, Segment::Context), (QUESTION_SLOT, Segment::Question)]
                .into_iter()
                .filter_map(|(marker, segment)| rest.find(marker).map(|pos| (pos, marker, segment)))
                .min_by_key(|(pos, _, _)| *pos);

            match next_slot {
                Some((pos, marker, segment)) => {
                    let (literal, tail) = rest.split_at(pos);
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(literal.to_string()));
                    }
                    segments.push(segment);
                    rest = tail.strip_prefix(marker).unwrap_or_default();
                }
                None => {
                    segments.push(Segment::Literal(rest.to_string()));
                    rest = "";
                }
            }
        }

        if !segments.contains(&Segment::Context) || !segments.contains(&Segment::Question) {
            return Err(RagError::InvalidConfig(
                "prompt template must contain both {context} and {question} slots".to_string(),
            ));
        }

        Ok(Self::from_segments(segments))
    }

    /// Parse a user-supplied template, prefixing the grounding directive
    /// when the template does not already carry it
    #[inline]
    pub fn grounded(template: &str) -> Result<Self> {
        let mut parsed = Self::parse(template)?;
        if !template.contains(GROUNDING_DIRECTIVE) {
            parsed
                .segments
                .insert(0, Segment::Literal(format!("{}\n\n", GROUNDING_DIRECTIVE)));
            parsed = Self::from_segments(parsed.segments);
        }
        Ok(parsed)
    }

    fn from_segments(segments: Vec<Segment>) -> Self {
        let count = |wanted: &Segment| segments.iter().filter(|s| *s == wanted).count();
        let context_slots = count(&Segment::Context);
        let question_slots = count(&Segment::Question);
        let literal_chars = segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.chars().count(),
                Segment::Context | Segment::Question => 0,
            })
            .sum();

        Self {
            segments,
            literal_chars,
            context_slots,
            question_slots,
        }
    }

    /// Fill both slots
    #[inline]
    pub fn render(&self, context: &str, question: &str) -> String {
        let mut prompt = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => prompt.push_str(text),
                Segment::Context => prompt.push_str(context),
                Segment::Question => prompt.push_str(question),
            }
        }
        prompt
    }

    /// Length in characters of the rendered prompt for the given slot lengths
    fn rendered_len(&self, context_chars: usize, question_chars: usize) -> usize {
        self.literal_chars + self.context_slots * context_chars + self.question_slots * question_chars
    }
}

impl Default for PromptTemplate {
    #[inline]
    fn default() -> Self {
        Self::from_segments(vec![
            Segment::Literal(format!("{}\n\nContext:\n", GROUNDING_DIRECTIVE)),
            Segment::Context,
            Segment::Literal("\n\nQuestion: ".to_string()),
            Segment::Question,
            Segment::Literal("\nHelpful Answer:".to_string()),
        ])
    }
}

/// Renders ranked passages into a template under a character budget
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    template: PromptTemplate,
    max_prompt_chars: usize,
}

impl PromptAssembler {
    #[inline]
    pub fn new(template: PromptTemplate, max_prompt_chars: usize) -> Self {
        Self {
            template,
            max_prompt_chars,
        }
    }

    #[inline]
    pub fn with_default_template(max_prompt_chars: usize) -> Self {
        Self::new(PromptTemplate::default(), max_prompt_chars)
    }

    /// How many of the ranked passages fit the budget; never fewer than one
    /// when any passage was retrieved
    fn passages_within_budget(&self, retrieved: &[RetrievedPassage], question: &str) -> usize {
        let question_chars = question.chars().count();
        let delimiter_chars = PASSAGE_DELIMITER.chars().count();

        let mut context_chars = 0;
        let mut kept = 0;
        for passage in retrieved {
            let passage_chars = passage.text.chars().count();
            let candidate = if kept == 0 {
                passage_chars
            } else {
                context_chars + delimiter_chars + passage_chars
            };

            if kept > 0 && self.template.rendered_len(candidate, question_chars) > self.max_prompt_chars
            {
                break;
            }
            context_chars = candidate;
            kept += 1;
        }
        kept
    }
}

impl AssemblePrompt for PromptAssembler {
    #[inline]
    fn assemble(&self, retrieved: &[RetrievedPassage], question: &str) -> Result<String> {
        let kept = self.passages_within_budget(retrieved, question);
        if kept < retrieved.len() {
            debug!(
                "Dropped {} lowest-ranked passages to fit {} char prompt budget",
                retrieved.len() - kept,
                self.max_prompt_chars
            );
        }

        let context = retrieved
            .iter()
            .take(kept)
            .map(|passage| passage.text.as_str())
            .join(PASSAGE_DELIMITER);

        Ok(self.template.render(&context, question))
    }

    #[inline]
    fn passages_used(&self, retrieved: &[RetrievedPassage], question: &str) -> usize {
        self.passages_within_budget(retrieved, question)
    }
}
