use super::*;
use crate::database::lancedb::ChunkMetadata;

fn passage(text: &str, chunk_index: u32) -> RetrievedPassage {
    RetrievedPassage {
        text: text.to_string(),
        metadata: ChunkMetadata {
            source: "handbook.txt".to_string(),
            page_index: 3,
            chunk_index,
        },
        score: 0.9,
        distance: 0.1,
    }
}

fn compact_template() -> PromptTemplate {
    PromptTemplate::parse("C:{context}|Q:{question}").expect("should parse template")
}

#[test]
fn default_template_matches_constant() {
    let parsed = PromptTemplate::parse(DEFAULT_TEMPLATE).expect("should parse default template");
    assert_eq!(parsed, PromptTemplate::default());
    assert!(DEFAULT_TEMPLATE.starts_with(GROUNDING_DIRECTIVE));
}

#[test]
fn template_requires_both_slots() {
    for template in ["{context} only", "only {question}", "no slots at all", ""] {
        let result = PromptTemplate::parse(template);
        assert!(
            matches!(result, Err(RagError::InvalidConfig(_))),
            "template {:?} should be rejected",
            template
        );
    }
}

#[test]
fn grounded_template_gains_directive() {
    let template = PromptTemplate::grounded("Docs:\n{context}\nQ: {question}\nA:")
        .expect("should parse template");

    assert_eq!(
        template.render("ctx", "why?"),
        format!("{}\n\nDocs:\nctx\nQ: why?\nA:", GROUNDING_DIRECTIVE)
    );
}

#[test]
fn grounded_template_keeps_existing_directive() {
    let grounded = PromptTemplate::grounded(DEFAULT_TEMPLATE).expect("should parse template");
    assert_eq!(grounded, PromptTemplate::default());

    let rendered = grounded.render("ctx", "why?");
    assert_eq!(rendered.matches(GROUNDING_DIRECTIVE).count(), 1);
}

#[test]
fn grounded_directive_counts_toward_budget() {
    let template = PromptTemplate::grounded("C:{context}|Q:{question}").expect("should parse template");
    let budget = GROUNDING_DIRECTIVE.chars().count() + 2 + "C:aaaa|Q:q?".chars().count();
    let retrieved = vec![passage("aaaa", 0), passage("bbbb", 1)];

    let prompt = PromptAssembler::new(template, budget)
        .assemble(&retrieved, "q?")
        .expect("should assemble prompt");

    assert!(prompt.ends_with("C:aaaa|Q:q?"));
    assert_eq!(prompt.chars().count(), budget);
}

#[test]
fn render_fills_slots() {
    let template = compact_template();
    assert_eq!(template.render("ctx", "why?"), "C:ctx|Q:why?");
}

#[test]
fn slot_markers_in_inputs_are_not_expanded() {
    let assembler = PromptAssembler::new(compact_template(), 1000);
    let prompt = assembler
        .assemble(&[passage("{question}", 0)], "{context}")
        .expect("should assemble prompt");

    assert_eq!(prompt, "C:{question}|Q:{context}");
}

#[test]
fn passages_joined_in_rank_order_without_metadata() {
    let assembler = PromptAssembler::with_default_template(8000);
    let retrieved = vec![
        passage("First passage.", 4),
        passage("Second passage.", 1),
        passage("Third passage.", 9),
    ];

    let prompt = assembler
        .assemble(&retrieved, "What comes first?")
        .expect("should assemble prompt");

    assert!(prompt.contains("First passage.\n\nSecond passage.\n\nThird passage."));
    assert!(prompt.contains("What comes first?"));
    assert!(prompt.starts_with(GROUNDING_DIRECTIVE));
    assert!(!prompt.contains("handbook.txt"));
}

#[test]
fn empty_context_keeps_question_and_directive() {
    let assembler = PromptAssembler::with_default_template(8000);
    let question = "What is the airspeed velocity of an unladen swallow?";

    let prompt = assembler
        .assemble(&[], question)
        .expect("should assemble prompt");

    assert!(prompt.contains(GROUNDING_DIRECTIVE));
    assert!(prompt.contains(question));
}

#[test]
fn lowest_ranked_passages_dropped_over_budget() {
    let retrieved = vec![passage("aaaa", 0), passage("bbbb", 1), passage("cccc", 2)];

    let unbounded = PromptAssembler::new(compact_template(), 1000)
        .assemble(&retrieved, "q?")
        .expect("should assemble prompt");
    assert_eq!(unbounded, "C:aaaa\n\nbbbb\n\ncccc|Q:q?");

    let bounded = PromptAssembler::new(compact_template(), 17)
        .assemble(&retrieved, "q?")
        .expect("should assemble prompt");
    assert_eq!(bounded, "C:aaaa\n\nbbbb|Q:q?");
    assert!(bounded.chars().count() <= 17);
}

#[test]
fn top_passage_kept_even_when_over_budget() {
    let retrieved = vec![passage("aaaa", 0), passage("bbbb", 1)];

    let prompt = PromptAssembler::new(compact_template(), 5)
        .assemble(&retrieved, "q?")
        .expect("should assemble prompt");

    assert_eq!(prompt, "C:aaaa|Q:q?");
}

#[test]
fn budget_counts_characters_not_bytes() {
    let retrieved = vec![passage("éééé", 0), passage("üüüü", 1)];

    let prompt = PromptAssembler::new(compact_template(), 17)
        .assemble(&retrieved, "q?")
        .expect("should assemble prompt");

    assert_eq!(prompt, "C:éééé\n\nüüüü|Q:q?");
}
