//! Paper evaluation: prompt, completion, sanitize, parse, bounded retry.
//!
//! Every failure maps to a well-formed [`EvaluationResult`], so a batch never
//! aborts on one bad record.

use crate::config::Config;
use crate::llm::CompletionService;
use crate::paper::{PaperRecord, NOT_AVAILABLE};
use crate::prompts::review::build_review_prompt;
use crate::sanitize::{is_balanced, sanitize};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Placeholder for a failed score or value
pub const ERROR_SENTINEL: &str = "-";

/// Outcome of judging one paper's relevance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub score: String,
    pub reason: String,
    pub notes: String,
    #[serde(rename = "added value")]
    pub added_value: String,
}

impl EvaluationResult {
    /// Fallback when the reply never parsed
    pub fn parse_error() -> Self {
        Self {
            score: ERROR_SENTINEL.to_string(),
            reason: "JSON parsing error".to_string(),
            notes: "An error occurred while parsing the model response.".to_string(),
            added_value: ERROR_SENTINEL.to_string(),
        }
    }

    /// Fallback when the completion service failed
    pub fn api_error() -> Self {
        Self {
            score: ERROR_SENTINEL.to_string(),
            reason: "API error".to_string(),
            notes: "An error occurred during the API call.".to_string(),
            added_value: ERROR_SENTINEL.to_string(),
        }
    }

    /// Build from a parsed JSON object. Missing keys become `"N/A"`,
    /// non-string scalars are kept as their JSON text.
    pub fn from_object(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        let field = |key: &str| match object.get(key) {
            None | Some(serde_json::Value::Null) => NOT_AVAILABLE.to_string(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };

        Self {
            score: field("score"),
            reason: field("reason"),
            notes: field("notes"),
            added_value: field("added value"),
        }
    }
}

/// How an evaluation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Reply parsed on the given attempt (1-based)
    Parsed { attempts: u32 },
    /// Completion service failed
    ApiError,
    /// Every attempt returned unparseable text
    ParseError { attempts: u32 },
}

/// Result plus how it was reached
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub result: EvaluationResult,
    pub outcome: Outcome,
}

/// Evaluator settings
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub research_topic: String,
    pub research_topic_note: String,
    /// Total completion attempts per paper when replies fail to parse
    pub max_attempts: u32,
}

impl From<&Config> for EvaluatorConfig {
    fn from(c: &Config) -> Self {
        Self {
            research_topic: c.research_topic.clone(),
            research_topic_note: c.research_topic_note.clone(),
            max_attempts: c.max_attempts,
        }
    }
}

/// Drives one paper through completion and parsing
pub struct Evaluator<C> {
    config: EvaluatorConfig,
    service: C,
}

impl<C: CompletionService> Evaluator<C> {
    pub fn new(config: EvaluatorConfig, service: C) -> Self {
        Self { config, service }
    }

    /// Evaluate a paper, returning only the result.
    pub async fn evaluate(&self, paper: &PaperRecord) -> EvaluationResult {
        self.evaluate_detailed(paper).await.result
    }

    /// Evaluate a paper.
    ///
    /// A service error is terminal. A reply that does not parse is retried
    /// until `max_attempts` completions have been made, then the parse-error
    /// sentinel is returned.
    pub async fn evaluate_detailed(&self, paper: &PaperRecord) -> Evaluation {
        let prompt = build_review_prompt(
            &self.config.research_topic,
            &self.config.research_topic_note,
            paper,
        );
        let max_attempts = self.config.max_attempts.max(1);
        let title: String = paper.title().chars().take(60).collect();

        for attempt in 1..=max_attempts {
            let raw = match self.service.complete(&prompt).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(title = %title, error = %e, "Completion service call failed");
                    return Evaluation {
                        result: EvaluationResult::api_error(),
                        outcome: Outcome::ApiError,
                    };
                }
            };

            let cleaned = sanitize(&raw);
            debug!(title = %title, attempt, raw = %raw, "Raw model reply");
            debug!(title = %title, attempt, cleaned = %cleaned, "Sanitized model reply");
            if !is_balanced(&raw) {
                warn!(title = %title, attempt, "Model reply has an odd number of quotes");
            }

            match parse_reply(&cleaned) {
                Ok(result) => {
                    info!(title = %title, attempt, score = %result.score, "Paper evaluated");
                    return Evaluation {
                        result,
                        outcome: Outcome::Parsed { attempts: attempt },
                    };
                }
                Err(e) => {
                    warn!(
                        title = %title,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Error parsing JSON response"
                    );
                }
            }
        }

        Evaluation {
            result: EvaluationResult::parse_error(),
            outcome: Outcome::ParseError {
                attempts: max_attempts,
            },
        }
    }
}

/// Parse sanitized text into a result.
///
/// Raw control characters left inside quoted values (the newlines of a
/// bulleted `"notes"`) are escaped first. The whole text is then tried;
/// failing that, the JSON found inside a code fence or between the outermost
/// braces.
pub fn parse_reply(cleaned: &str) -> std::result::Result<EvaluationResult, serde_json::Error> {
    let escaped = escape_quoted_controls(cleaned);
    let value = match serde_json::from_str::<serde_json::Value>(&escaped) {
        Ok(v) => v,
        Err(first) => match extract_json(&escaped) {
            Some(inner) if inner != escaped => serde_json::from_str(&inner)?,
            _ => return Err(first),
        },
    };

    match value {
        serde_json::Value::Object(object) => Ok(EvaluationResult::from_object(&object)),
        other => Err(serde::de::Error::custom(format!(
            "expected a JSON object, found {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Rewrite U+0000..=U+001F inside quoted segments as JSON escapes.
///
/// Uses the same `"` parity as [`sanitize`], so the two stay aligned.
fn escape_quoted_controls(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, part) in text.split('"').enumerate() {
        if i > 0 {
            out.push('"');
        }
        if i % 2 == 0 {
            out.push_str(part);
            continue;
        }
        for c in part.chars() {
            match c {
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                '\u{08}' => out.push_str("\\b"),
                '\u{0C}' => out.push_str("\\f"),
                c if u32::from(c) < 0x20 => out.push_str(&format!("\\u{:04x}", u32::from(c))),
                c => out.push(c),
            }
        }
    }
    out
}

/// Extract JSON from a model reply (handles markdown code fences and
/// surrounding prose)
fn extract_json(content: &str) -> Option<String> {
    let trimmed = content.trim();

    if let Some(rest) = trimmed.strip_prefix("```") {
        let body = rest.strip_prefix("json").unwrap_or(rest);
        let body = body.strip_suffix("```").unwrap_or(body);
        let body = body.trim();
        if body.starts_with('{') {
            return Some(body.to_string());
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| trimmed[start..=end].to_string())
}
