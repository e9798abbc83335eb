//! Agent WebSocket envelope: tagged-JSON request and response enums.
//!
//! One connection carries one request followed by its ordered responses.
//! `Stream` requests produce a sequence of [`StreamFrame`] responses whose
//! terminal frame has `is_last = true`; `Process` and `Health` produce a
//! single response. A malformed request yields one `Error` response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::frame::StreamFrame;

/// Request sent by the gateway (or any client) to the agent service.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentRequest {
    /// Unary: run the agent to completion, return one `Message` response.
    Process(MessageRequest),
    /// Server-streaming: run the agent, return a `Frame` sequence.
    Stream(MessageRequest),
    /// Liveness probe, answered with one `Health` response.
    Health,
}

/// Message payload for `Process` and `Stream`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MessageRequest {
    pub session_id: String,
    pub user_input: String,
    /// Model to run under; empty selects the configured default.
    #[serde(default)]
    pub model_id: String,
    /// Must be true for `Stream` requests.
    #[serde(default)]
    pub stream: bool,
}

/// Response sent by the agent service.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentResponse {
    Frame(StreamFrame),
    Message(MessageResponse),
    Health(HealthResponse),
    Error(ErrorResponse),
}

/// Unary result: final answer plus the reasoning trace that produced it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    #[serde(default)]
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningInfo>,
    #[serde(default)]
    pub history: Vec<HistoryStep>,
}

/// Condensed reasoning trace for the unary response.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReasoningInfo {
    pub text: String,
    pub total_steps: usize,
    pub tools_used: Vec<String>,
}

/// One ReAct step in the unary response history. Thought/action/evaluation
/// keep the engine's serialized shape; the gateway treats them as opaque.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistoryStep {
    pub step: usize,
    pub thought: Value,
    pub action: Value,
    pub evaluation: Value,
    pub timestamp: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
    pub status: String,
}

/// Protocol-level failure (parse error, unknown model, internal fault on the
/// unary path). Stream-path failures travel as `Frame(error)` instead.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
