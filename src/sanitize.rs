//! Quote-aware cleanup of model replies.
//!
//! Models wrap their JSON in prose, code fences and stray control characters.
//! [`sanitize`] strips that noise from the structural text between quoted
//! values while leaving every quoted value byte-for-byte intact, so a
//! multi-line bullet list inside `"notes"` keeps its embedded newlines.
//!
//! ## Limitation
//!
//! Quoted and unquoted text is told apart purely by the parity of `"`
//! delimiters. A reply with an odd number of `"` (truncated output, or an
//! escaped `\"` inside a value) shifts the parity for everything after the
//! imbalance: structural text may be left dirty and quoted text may be
//! stripped. Use [`is_balanced`] to detect this before trusting the result.

use regex::Regex;
use std::sync::OnceLock;

/// Control characters U+0000..=U+001F and U+007F
fn control_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\x00-\x1F\x7F]+").expect("valid control-char regex"))
}

/// Clean raw model text so it can be parsed as JSON.
///
/// Splits on `"`, and for every even-indexed (unquoted) segment removes
/// control characters and trims surrounding whitespace. Odd-indexed segments
/// are quoted content and are left untouched. The segments are rejoined with
/// `"`, so the output has exactly as many quotes as the input.
///
/// Pure and total: never fails, worst case returns text that still does not
/// parse.
pub fn sanitize(raw: &str) -> String {
    let re = control_chars();

    raw.split('"')
        .enumerate()
        .map(|(i, part)| {
            if i % 2 == 0 {
                re.replace_all(part, "").trim().to_string()
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\"")
}

/// Number of `"` characters in `text`.
pub fn quote_count(text: &str) -> usize {
    text.matches('"').count()
}

/// Whether `text` has an even number of `"`, i.e. the parity heuristic in
/// [`sanitize`] stays aligned over the whole input.
pub fn is_balanced(text: &str) -> bool {
    quote_count(text) % 2 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EXAMPLE_REPLY: &str = "{\n   \"score\": \"85%\",\n\"reason\": \"Good fit.\",\n\"notes\": \"- point one\n- point two\",\n\"added value\": \"Useful.\"\n}";

    #[test]
    fn test_example_reply_parses() {
        let cleaned = sanitize(EXAMPLE_REPLY);
        assert_eq!(
            cleaned,
            "{\"score\":\"85%\",\"reason\":\"Good fit.\",\"notes\":\"- point one\n- point two\",\"added value\":\"Useful.\"}"
        );
        let result = crate::evaluator::parse_reply(&cleaned).unwrap();
        assert_eq!(result.score, "85%");
        assert_eq!(result.reason, "Good fit.");
        assert_eq!(result.notes, "- point one\n- point two");
        assert_eq!(result.added_value, "Useful.");
    }

    #[test]
    fn test_raw_example_reply_does_not_parse() {
        // the literal newline inside "notes" is invalid JSON on its own
        assert!(serde_json::from_str::<serde_json::Value>(EXAMPLE_REPLY).is_err());
    }

    #[test]
    fn test_strips_outside_quotes() {
        let cleaned = sanitize("a\x01\x02  \"x\"  \x7fb");
        assert_eq!(cleaned, "a\"x\"b");
    }

    #[test]
    fn test_keeps_quoted_control_chars() {
        let cleaned = sanitize("prefix \"keep\n\tthis\" suffix");
        assert!(cleaned.contains("keep\n\tthis"));
        assert_eq!(cleaned, "prefix\"keep\n\tthis\"suffix");
    }

    #[test]
    fn test_clean_input_unchanged() {
        let input = r#"{"score":"80%","reason":"fine"}"#;
        assert_eq!(sanitize(input), input);
    }

    #[test]
    fn test_empty_and_quote_only() {
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("\"\""), "\"\"");
        assert_eq!(sanitize(" \n "), "");
    }

    #[test]
    fn test_inner_whitespace_between_tokens_kept() {
        // only leading/trailing whitespace of a segment is trimmed
        assert_eq!(sanitize("{ \"a\" :  \"b\" }"), "{\"a\":\"b\"}");
        assert_eq!(sanitize("x  y\"q\""), "x  y\"q\"");
    }

    #[test]
    fn test_code_fence_left_in_place() {
        let cleaned = sanitize("```json\n{\"score\": \"1%\"}\n```");
        assert_eq!(cleaned, "```json{\"score\":\"1%\"}```");
    }

    #[test]
    fn test_odd_quote_count_misaligns() {
        // a stray leading quote flips parity: structural text is treated as
        // quoted content and nothing outside the values gets cleaned
        let raw = "\"oops {\"score\": \"1%\"}\n";
        assert!(!is_balanced(raw));
        let cleaned = sanitize(raw);
        assert_eq!(quote_count(&cleaned), quote_count(raw));
        assert_eq!(cleaned, raw);
    }

    #[test]
    fn test_escaped_quote_shifts_parity() {
        // a lone \" inside a value counts as a delimiter; the rest of the
        // value is treated as structural and loses its newline
        let raw = "{\"notes\": \"say \\\"hi\nthen\"}";
        assert!(!is_balanced(raw));
        let cleaned = sanitize(raw);
        assert_eq!(quote_count(&cleaned), quote_count(raw));
        assert_eq!(cleaned, "{\"notes\":\"say \\\"hithen\"}");
    }

    #[test]
    fn test_quote_helpers() {
        assert_eq!(quote_count(r#""a" "b""#), 4);
        assert!(is_balanced("no quotes"));
        assert!(!is_balanced("\""));
    }

    proptest! {
        #[test]
        fn prop_quote_count_preserved(input in "[ -~\\t\\n\\r\\x00-\\x1f\\x7f]{0,80}") {
            prop_assert_eq!(quote_count(&sanitize(&input)), quote_count(&input));
        }

        #[test]
        fn prop_idempotent_when_balanced(input in "[ -~\\t\\n\\x01\\x7f]{0,80}") {
            prop_assume!(is_balanced(&input));
            let once = sanitize(&input);
            prop_assert_eq!(sanitize(&once), once);
        }

        #[test]
        fn prop_quoted_content_survives(
            prefix in "[a-z \\n\\t]{0,10}",
            inner in "[a-z \\n\\t-]{0,20}",
            suffix in "[a-z \\n\\t]{0,10}",
        ) {
            let raw = format!("{prefix}\"{inner}\"{suffix}");
            let cleaned = sanitize(&raw);
            let quoted = format!("\"{inner}\"");
            prop_assert!(cleaned.contains(&quoted));
        }
    }
}
