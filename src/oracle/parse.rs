//! Lenient parsing of free-form oracle responses.
//!
//! Chat models wrap JSON in code fences, prefix it with a language tag, drop
//! the enclosing brackets or leave trailing commas. These helpers repair the
//! common cases; anything still unparsable becomes a degraded outcome.

use std::sync::OnceLock;

use log::{debug, warn};
use regex::Regex;

use crate::{
    error::OracleError,
    oracle::{CorrelationResult, MappingSuggestion, ScoreOutcome},
};

static TRAILING_COMMA: OnceLock<Regex> = OnceLock::new();

fn trailing_comma() -> &'static Regex {
    TRAILING_COMMA.get_or_init(|| Regex::new(r",(\s*[}\]])").expect("valid trailing comma regex"))
}

/// Removes code fences and a leading language tag.
pub fn strip_code_fence(content: &str) -> &str {
    let mut text = content.trim();
    if text.starts_with("```") {
        text = text.split("```").nth(1).unwrap_or_default().trim();
    } else {
        text = text.trim_matches('`').trim();
    }
    for tag in ["json", "python"] {
        if let Some(rest) = text.strip_prefix(tag) {
            text = rest.trim_start();
            break;
        }
    }
    text
}

/// Normalises a scorer response into something that should parse as a JSON
/// array.
pub fn repair_json_array(content: &str) -> String {
    let mut text = strip_code_fence(content).to_string();
    if !text.starts_with('[') {
        text.insert(0, '[');
    }
    if !text.ends_with(']') {
        text.push(']');
    }
    trailing_comma().replace_all(&text, "$1").into_owned()
}

/// Parses a scorer response for a batch of `batch_len` candidates. Unusable
/// content yields an all-zero stub rather than an error.
pub fn parse_score_response(content: &str, batch_len: usize) -> ScoreOutcome {
    let repaired = repair_json_array(content);
    debug!("Parsing scorer response: {repaired}");
    match serde_json::from_str::<Vec<CorrelationResult>>(&repaired) {
        Ok(results) => ScoreOutcome::Scored(results),
        Err(err) => {
            warn!("Scorer response is not valid JSON ({err}); substituting zero scores");
            debug!("Raw scorer response: {content}");
            ScoreOutcome::degraded(format!("unparsable scorer response: {err}"), batch_len)
        }
    }
}

/// Parses a mapper response of the shape
/// `{"mappings": {...}, "explanations": {...}}`.
pub fn parse_mapping_response(content: &str) -> Result<MappingSuggestion, OracleError> {
    let text = strip_code_fence(content);
    let start = text.find('{');
    let end = text.rfind('}');
    let body = match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => return Err(OracleError::Parse("no JSON object in mapper response".to_string())),
    };
    let body = trailing_comma().replace_all(body, "$1");
    serde_json::from_str(&body).map_err(|err| OracleError::Parse(err.to_string()))
}
