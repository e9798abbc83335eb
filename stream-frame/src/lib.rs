//! Wire types shared by the agent service and the gateway.
//!
//! Three layers, leaves first:
//! - [`frame`]: the `StreamFrame` discriminated union the agent emits;
//! - [`protocol`]: the request/response envelope carried over the agent's
//!   WebSocket (one request, ordered frame stream, terminal `is_last`);
//! - [`sse`]: the browser-facing Server-Sent-Events catalog and framing.

pub mod frame;
pub mod protocol;
pub mod sse;

pub use frame::{FrameKind, StreamFrame};
pub use protocol::{
    AgentRequest, AgentResponse, ErrorResponse, HealthResponse, HistoryStep, MessageRequest,
    MessageResponse, ReasoningInfo,
};
pub use sse::SseEvent;
