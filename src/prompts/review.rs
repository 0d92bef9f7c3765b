//! Review prompt for scoring a paper against a research topic.
//!
//! The model is asked for a four-key JSON object (`score`, `reason`, `notes`,
//! `added value`) and shown one worked example to anchor the format.

use crate::paper::PaperRecord;
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Prompt template.
/// Placeholders: {topic}, {title}, {abstract}, {authors}, {year}, {cited}, {note}
pub const REVIEW_PROMPT_TEMPLATE: &str = r#"I am working on a research project on "{topic}". Please evaluate the following paper critically and provide in a short answer:
- The added value of this paper to my research. (if any) (1-2 sentences)
- Any additional notes or observations regarding the paper in bullet points. (1-3 short points)
- A score (0-100%) indicating the relevance of this paper to my research project. (x%)
- A reason explaining why the score was given. (1-2 sentences)

Here is the information of the paper to be evaluated:
Title: {title}
Abstract: {abstract}
Authors: {authors}
Publication Year: {year}
Times Cited: {cited}
Note: {note}. Articles unrelated to this topic should be scored accordingly. Be critical and provide constructive feedback. If the paper is not relevant (<50% score), please provide a briefer answer with really short sentences.

Here is an example of the JSON format I expect for the response:
{"score": "80%", "reason": "The paper provides a comprehensive overview.", "notes": "[INSERT PAPER SPECIFIC NOTES as BULLETPOINTS].", "added value": "[INSERT WHAT VALUE THIS PAPER ADDS TO THE RESEARCH PROJECT + {topic}]"}"#;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{(topic|title|abstract|authors|year|cited|note)\}")
            .expect("valid placeholder regex")
    })
}

/// Build the review prompt for one paper.
///
/// Placeholders are filled in one pass, so braces inside paper fields are
/// left as written.
pub fn build_review_prompt(topic: &str, topic_note: &str, paper: &PaperRecord) -> String {
    let note = topic_note.trim().trim_end_matches('.');

    placeholder()
        .replace_all(REVIEW_PROMPT_TEMPLATE, |caps: &Captures| {
            let value = match &caps[1] {
                "topic" => topic,
                "title" => paper.title(),
                "abstract" => paper.abstract_text(),
                "authors" => paper.authors(),
                "year" => paper.publication_year(),
                "cited" => paper.citation_count(),
                _ => note,
            };
            value.to_string()
        })
        .into_owned()
}
