//! `StreamFrame`: the discriminated union streamed from the agent handler to
//! the gateway. Frame order on the wire follows
//! `thinking_start (thinking_chunk* thinking_end)? (answer_start answer*)? (done|error)`
//! with exactly one terminal frame carrying `is_last = true`.

use serde::{Deserialize, Serialize};

/// Frame tag. `Done` and `Error` are terminal; everything else is interior.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    ThinkingStart,
    ThinkingChunk,
    ThinkingEnd,
    AnswerStart,
    Answer,
    Done,
    Error,
}

impl FrameKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, FrameKind::Done | FrameKind::Error)
    }

    /// Wire name, identical to the serde rename.
    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::ThinkingStart => "thinking_start",
            FrameKind::ThinkingChunk => "thinking_chunk",
            FrameKind::ThinkingEnd => "thinking_end",
            FrameKind::AnswerStart => "answer_start",
            FrameKind::Answer => "answer",
            FrameKind::Done => "done",
            FrameKind::Error => "error",
        }
    }
}

/// One frame on the agent stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    pub chunk_type: FrameKind,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_last: bool,
}

impl StreamFrame {
    fn control(chunk_type: FrameKind) -> Self {
        Self {
            chunk_type,
            content: String::new(),
            is_last: false,
        }
    }

    pub fn thinking_start() -> Self {
        Self::control(FrameKind::ThinkingStart)
    }

    pub fn thinking_chunk(content: impl Into<String>) -> Self {
        Self {
            chunk_type: FrameKind::ThinkingChunk,
            content: content.into(),
            is_last: false,
        }
    }

    pub fn thinking_end() -> Self {
        Self::control(FrameKind::ThinkingEnd)
    }

    pub fn answer_start() -> Self {
        Self::control(FrameKind::AnswerStart)
    }

    pub fn answer(content: impl Into<String>) -> Self {
        Self {
            chunk_type: FrameKind::Answer,
            content: content.into(),
            is_last: false,
        }
    }

    pub fn done() -> Self {
        Self {
            chunk_type: FrameKind::Done,
            content: String::new(),
            is_last: true,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            chunk_type: FrameKind::Error,
            content: message.into(),
            is_last: true,
        }
    }
}
