//! Tolerant JSON extraction from LLM output.
//!
//! Fallback ladder: direct parse → strip Markdown fences → regex-extract a
//! braced object → normalise single quotes. Callers never see an error from
//! this module; `None` means "use the rule path".

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("fence regex"));
static BRACED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("brace regex"));

/// Returns the content of the first fenced code block, or the input unchanged.
pub fn strip_markdown_fences(content: &str) -> &str {
    FENCED_JSON
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(content)
}

/// Extracts the first parsable JSON value from LLM output.
pub fn extract_json_object(content: &str) -> Option<Value> {
    let content = content.trim();
    if content.is_empty() {
        return None;
    }

    if let Ok(v) = serde_json::from_str::<Value>(content) {
        return Some(v);
    }

    let unfenced = strip_markdown_fences(content).trim();
    if let Ok(v) = serde_json::from_str::<Value>(unfenced) {
        return Some(v);
    }

    if let Some(m) = BRACED.find(unfenced) {
        let braced = m.as_str();
        if let Ok(v) = serde_json::from_str::<Value>(braced) {
            return Some(v);
        }
        // Last resort: models sometimes emit python-style single quotes.
        let normalised = braced.replace('\'', "\"");
        if let Ok(v) = serde_json::from_str::<Value>(&normalised) {
            return Some(v);
        }
    }

    None
}
