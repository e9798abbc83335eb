//! LLM client abstraction: unary chat and token-streaming chat against an
//! OpenAI-compatible endpoint.
//!
//! # Streaming
//!
//! `chat_stream` returns a lazy finite sequence of non-empty token strings.
//! Transport and parse failures never surface as `Err`: implementations push
//! one final synthetic `"[error: …]"` token and end the stream, so a consumer
//! that forwards tokens verbatim still terminates cleanly.

mod mock;
mod openai;
pub(crate) mod sse;

pub use mock::MockLlm;
pub use openai::OpenAiChat;

use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

use crate::error::AgentError;

/// One chat message in OpenAI wire shape.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// Per-call overrides; `None` falls back to the client's configured value.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatOptions {
    pub fn temperature(t: f32) -> Self {
        Self {
            temperature: Some(t),
            ..Default::default()
        }
    }
}

/// Token usage for one call, when the upstream reports it.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Unary chat result.
#[derive(Clone, Debug, Default)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<ChatUsage>,
    pub model: Option<String>,
}

/// Lazy finite token sequence from a streaming chat call.
pub type TokenStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Chat client. `OpenAiChat` is the real implementation; `MockLlm` scripts
/// responses for tests and offline runs.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Unary chat completion. Transport errors are retried with exponential
    /// backoff; HTTP errors are terminal and carry status + body.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        opts: ChatOptions,
    ) -> Result<ChatResponse, AgentError>;

    /// Streaming chat completion; see the module docs for error semantics.
    async fn chat_stream(&self, messages: &[ChatMessage], opts: ChatOptions) -> TokenStream;
}
