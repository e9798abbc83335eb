//! Real client for OpenAI-compatible `/chat/completions` endpoints.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use env_config::ModelConfig;
use futures::StreamExt;

use super::sse::{drain_lines, parse_sse_line, SseLine};
use super::{ChatMessage, ChatOptions, ChatResponse, ChatUsage, LlmClient, TokenStream};
use crate::error::AgentError;

const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 2000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Token channel capacity. A full channel blocks the reader task, extending
/// consumer back-pressure to the upstream connection.
const TOKEN_QUEUE_CAPACITY: usize = 64;

pub struct OpenAiChat {
    http: reqwest::Client,
    chat_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl OpenAiChat {
    pub fn new(cfg: &ModelConfig) -> Self {
        let timeout = Duration::from_secs(cfg.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        let api_base = cfg
            .api_base
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Self {
            http,
            chat_url: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            temperature: cfg.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: cfg.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    fn payload(&self, messages: &[ChatMessage], opts: ChatOptions, stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": opts.temperature.unwrap_or(self.temperature),
            "max_tokens": opts.max_tokens.unwrap_or(self.max_tokens),
            "stream": stream,
        })
    }

    async fn send(&self, payload: &Value) -> Result<reqwest::Response, AgentError> {
        let resp = self
            .http
            .post(&self.chat_url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| AgentError::LlmTransport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::LlmHttp {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmClient for OpenAiChat {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        opts: ChatOptions,
    ) -> Result<ChatResponse, AgentError> {
        let payload = self.payload(messages, opts, false);

        for attempt in 0..self.max_retries {
            match self.send(&payload).await {
                Ok(resp) => {
                    let body: Value = resp
                        .json()
                        .await
                        .map_err(|e| AgentError::LlmTransport(e.to_string()))?;
                    let content = body
                        .pointer("/choices/0/message/content")
                        .and_then(Value::as_str)
                        .ok_or(AgentError::LlmEmptyResponse)?
                        .to_string();
                    let usage = body
                        .get("usage")
                        .and_then(|u| serde_json::from_value::<ChatUsage>(u.clone()).ok());
                    let model = body.get("model").and_then(Value::as_str).map(String::from);
                    return Ok(ChatResponse {
                        content,
                        usage,
                        model,
                    });
                }
                // HTTP errors are terminal; only transport faults retry.
                Err(err @ AgentError::LlmHttp { .. }) => return Err(err),
                Err(AgentError::LlmTransport(reason)) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max = self.max_retries,
                        %reason,
                        "llm transport error"
                    );
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1u64 << attempt)).await;
                    }
                }
                Err(other) => return Err(other),
            }
        }
        Err(AgentError::LlmRetriesExhausted)
    }

    async fn chat_stream(&self, messages: &[ChatMessage], opts: ChatOptions) -> TokenStream {
        let payload = self.payload(messages, opts, true);
        let (tx, rx) = mpsc::channel::<String>(TOKEN_QUEUE_CAPACITY);
        let http = self.http.clone();
        let url = self.chat_url.clone();
        let api_key = self.api_key.clone();

        tokio::spawn(async move {
            let resp = match http
                .post(&url)
                .bearer_auth(&api_key)
                .json(&payload)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx.send(format!("[error: {}]", e)).await;
                    return;
                }
            };
            if !resp.status().is_success() {
                let status = resp.status();
                let _ = tx.send(format!("[error: HTTP {}]", status.as_u16())).await;
                return;
            }

            let mut buffer = String::new();
            let mut bytes = resp.bytes_stream();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(format!("[error: {}]", e)).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                for line in drain_lines(&mut buffer) {
                    match parse_sse_line(&line) {
                        SseLine::Token(token) => {
                            // Blocks when the consumer lags; back-pressure.
                            if tx.send(token).await.is_err() {
                                return;
                            }
                        }
                        SseLine::Done => return,
                        SseLine::Skip => {}
                    }
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ModelConfig {
        ModelConfig {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            api_key: "sk-test".into(),
            api_base: Some("https://example.invalid/v1/".into()),
            temperature: Some(0.3),
            max_tokens: Some(512),
            timeout: Some(1),
            name: None,
        }
    }

    #[test]
    fn url_and_defaults_from_config() {
        let client = OpenAiChat::new(&cfg());
        assert_eq!(client.chat_url, "https://example.invalid/v1/chat/completions");
        assert_eq!(client.temperature, 0.3);
        assert_eq!(client.max_tokens, 512);
        assert_eq!(client.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn payload_applies_overrides() {
        let client = OpenAiChat::new(&cfg());
        let msgs = [ChatMessage::user("hi")];
        let p = client.payload(&msgs, ChatOptions::temperature(0.9), true);
        assert_eq!(p["temperature"], 0.9);
        assert_eq!(p["max_tokens"], 512);
        assert_eq!(p["stream"], true);
        assert_eq!(p["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn stream_surfaces_connect_failure_as_error_token() {
        // Unresolvable host: the stream must end with a single synthetic
        // error token rather than an Err.
        let client = OpenAiChat::new(&ModelConfig {
            api_base: Some("http://127.0.0.1:1/v1".into()),
            ..cfg()
        });
        let tokens: Vec<String> = client
            .chat_stream(&[ChatMessage::user("hi")], ChatOptions::default())
            .await
            .collect()
            .await;
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].starts_with("[error:"));
    }
}
