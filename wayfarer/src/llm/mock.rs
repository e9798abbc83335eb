//! Mock LLM for tests and offline runs: scripted responses, consumed in
//! order, falling back to the last one.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ChatMessage, ChatOptions, ChatResponse, LlmClient, TokenStream};
use crate::error::AgentError;

pub struct MockLlm {
    responses: Mutex<Vec<String>>,
    cursor: Mutex<usize>,
    /// When set, every `chat` call fails with this transport error.
    fail_with: Option<String>,
}

impl MockLlm {
    pub fn new(response: impl Into<String>) -> Self {
        Self::with_responses(vec![response.into()])
    }

    /// Responses are returned in order; the last one repeats.
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses),
            cursor: Mutex::new(0),
            fail_with: None,
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            cursor: Mutex::new(0),
            fail_with: Some(reason.into()),
        }
    }

    fn next_response(&self) -> String {
        let responses = self.responses.lock().expect("mock responses lock");
        let mut cursor = self.cursor.lock().expect("mock cursor lock");
        let idx = (*cursor).min(responses.len().saturating_sub(1));
        *cursor += 1;
        responses.get(idx).cloned().unwrap_or_default()
    }

    /// Splits content into small streaming chunks (3 chars) so concatenation
    /// is exactly the unary content.
    fn tokens(content: &str) -> Vec<String> {
        let chars: Vec<char> = content.chars().collect();
        chars.chunks(3).map(|c| c.iter().collect()).collect()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _opts: ChatOptions,
    ) -> Result<ChatResponse, AgentError> {
        if let Some(reason) = &self.fail_with {
            return Err(AgentError::LlmTransport(reason.clone()));
        }
        Ok(ChatResponse {
            content: self.next_response(),
            usage: None,
            model: Some("mock".into()),
        })
    }

    async fn chat_stream(&self, _messages: &[ChatMessage], _opts: ChatOptions) -> TokenStream {
        let (tx, rx) = mpsc::channel(8);
        let items = if let Some(reason) = &self.fail_with {
            vec![format!("[error: {}]", reason)]
        } else {
            Self::tokens(&self.next_response())
        };
        tokio::spawn(async move {
            for token in items {
                if tx.send(token).await.is_err() {
                    return;
                }
            }
        });
        Box::pin(ReceiverStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn scripted_responses_in_order_then_repeat() {
        let llm = MockLlm::with_responses(vec!["one".into(), "two".into()]);
        assert_eq!(llm.chat(&[], ChatOptions::default()).await.unwrap().content, "one");
        assert_eq!(llm.chat(&[], ChatOptions::default()).await.unwrap().content, "two");
        assert_eq!(llm.chat(&[], ChatOptions::default()).await.unwrap().content, "two");
    }

    #[tokio::test]
    async fn stream_concatenates_to_unary_content() {
        let content = "北京三日游的行程安排如下";
        let llm = MockLlm::new(content);
        let tokens: Vec<String> = llm.chat_stream(&[], ChatOptions::default()).await.collect().await;
        assert!(tokens.len() > 1);
        assert_eq!(tokens.concat(), content);
    }

    #[tokio::test]
    async fn failing_mock_streams_error_token() {
        let llm = MockLlm::failing("connection refused");
        assert!(llm.chat(&[], ChatOptions::default()).await.is_err());
        let tokens: Vec<String> = llm.chat_stream(&[], ChatOptions::default()).await.collect().await;
        assert_eq!(tokens, vec!["[error: connection refused]".to_string()]);
    }
}
