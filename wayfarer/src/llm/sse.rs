//! Line-level parsing of the upstream chat-completions SSE stream.
//!
//! The upstream emits `data: {json}` lines terminated by `data: [DONE]`.
//! Token text lives at `choices[0].delta.content`; empty deltas and
//! unparsable payloads are skipped, matching the tolerant reader the
//! upstream contract expects.

use serde_json::Value;

/// Outcome of parsing one SSE line.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum SseLine {
    /// A non-empty token delta.
    Token(String),
    /// The `[DONE]` sentinel.
    Done,
    /// Comment, blank line, empty delta, or malformed payload.
    Skip,
}

pub(crate) fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return SseLine::Skip;
    };
    match value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        Some(token) if !token.is_empty() => SseLine::Token(token.to_string()),
        _ => SseLine::Skip,
    }
}

/// Splits a byte chunk that may end mid-line. Complete lines are returned;
/// the trailing partial line stays in `buffer` for the next chunk.
pub(crate) fn drain_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        lines.push(line.trim_end_matches(['\r', '\n']).to_string());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"北京"}}]}"#;
        assert_eq!(parse_sse_line(line), SseLine::Token("北京".into()));
    }

    #[test]
    fn done_sentinel() {
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
    }

    #[test]
    fn skips_empty_delta_and_noise() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{}}]}"#),
            SseLine::Skip
        );
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#),
            SseLine::Skip
        );
        assert_eq!(parse_sse_line(""), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line("data: {not json"), SseLine::Skip);
    }

    #[test]
    fn drain_lines_keeps_partial_tail() {
        let mut buf = String::from("data: a\ndata: b\r\ndata: par");
        let lines = drain_lines(&mut buf);
        assert_eq!(lines, vec!["data: a", "data: b"]);
        assert_eq!(buf, "data: par");
        buf.push('\n');
        assert_eq!(drain_lines(&mut buf), vec!["data: par"]);
        assert!(buf.is_empty());
    }
}
