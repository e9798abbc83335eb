//! Browser-facing SSE event catalog.
//!
//! Each event is one JSON object on a single `data:` line followed by a blank
//! line. For a completed stream the `type` sequence matches
//! `session_id reasoning_start (reasoning_chunk* reasoning_end)? (answer_start chunk*)? done`
//! (or the canonical error suffix); `heartbeat` may appear anywhere between
//! `session_id` and the terminal.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseEvent {
    SessionId { session_id: String },
    ReasoningStart,
    ReasoningChunk { content: String },
    ReasoningEnd,
    AnswerStart,
    Chunk { content: String },
    Done,
    Error { content: String },
    Heartbeat { timestamp: String },
    Metadata { metadata: Value },
}

impl SseEvent {
    /// Renders the event in SSE framing: `data: <json>\n\n`.
    pub fn to_sse(&self) -> String {
        // Serializing a unit-less tagged enum cannot fail.
        let json = serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error"}"#.into());
        format!("data: {}\n\n", json)
    }

    /// Wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            SseEvent::SessionId { .. } => "session_id",
            SseEvent::ReasoningStart => "reasoning_start",
            SseEvent::ReasoningChunk { .. } => "reasoning_chunk",
            SseEvent::ReasoningEnd => "reasoning_end",
            SseEvent::AnswerStart => "answer_start",
            SseEvent::Chunk { .. } => "chunk",
            SseEvent::Done => "done",
            SseEvent::Error { .. } => "error",
            SseEvent::Heartbeat { .. } => "heartbeat",
            SseEvent::Metadata { .. } => "metadata",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SseEvent::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_framing_is_single_data_line() {
        let ev = SseEvent::Chunk {
            content: "北京".into(),
        };
        let framed = ev.to_sse();
        assert!(framed.starts_with("data: {"));
        assert!(framed.ends_with("\n\n"));
        assert_eq!(framed.matches('\n').count(), 2);
    }

    #[test]
    fn tagged_serialization() {
        let ev = SseEvent::SessionId {
            session_id: "abc".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "session_id");
        assert_eq!(json["session_id"], "abc");

        let unit = serde_json::to_value(SseEvent::ReasoningEnd).unwrap();
        assert_eq!(unit["type"], "reasoning_end");
    }

    #[test]
    fn kind_matches_serde_tag() {
        for ev in [
            SseEvent::ReasoningStart,
            SseEvent::AnswerStart,
            SseEvent::Done,
            SseEvent::Heartbeat {
                timestamp: "2024-01-08T12:00:00Z".into(),
            },
        ] {
            let json = serde_json::to_value(&ev).unwrap();
            assert_eq!(json["type"], ev.kind());
        }
    }

    #[test]
    fn only_done_is_terminal() {
        assert!(SseEvent::Done.is_terminal());
        assert!(!SseEvent::Error {
            content: "x".into()
        }
        .is_terminal());
        assert!(!SseEvent::ReasoningEnd.is_terminal());
    }
}
