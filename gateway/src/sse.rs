//! RPC→SSE re-framer.
//!
//! Translates each incoming frame per the fixed table, injects a heartbeat
//! after 30 s without a frame, enforces the end-to-end request deadline, and
//! stops reading the moment the client disconnects (the event channel
//! closes). Emissions never continue past the terminal event.

use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use stream_frame::{FrameKind, MessageRequest, SseEvent, StreamFrame};

use super::agent::{AgentClient, FrameSource};

pub(crate) const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Fairness yield between SSE emissions; a tuning constant, not a contract.
const EVENT_YIELD: Duration = Duration::from_millis(10);

pub(crate) const EMPTY_MESSAGE_DETAIL: &str = "消息不能为空";
pub(crate) const OVERSIZED_MESSAGE_DETAIL: &str = "消息长度不能超过5000字符";
pub(crate) const MAX_MESSAGE_CHARS: usize = 5000;

const PROCESSING_ERROR_FALLBACK: &str = "抱歉，处理您的请求时出现问题。";
const UPSTREAM_ERROR_FALLBACK: &str = "抱歉，连接后端服务失败，请稍后重试。";

/// 422 detail for an invalid chat message, if any.
pub(crate) fn validate_message(message: &str) -> Option<&'static str> {
    if message.trim().is_empty() {
        return Some(EMPTY_MESSAGE_DETAIL);
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Some(OVERSIZED_MESSAGE_DETAIL);
    }
    None
}

/// Frame → SSE translation table. An `error` frame expands into the
/// recovery sequence ending in `done`.
pub(crate) fn translate_frame(frame: &StreamFrame) -> Vec<SseEvent> {
    match frame.chunk_type {
        FrameKind::ThinkingStart => vec![SseEvent::ReasoningStart],
        FrameKind::ThinkingChunk => vec![SseEvent::ReasoningChunk {
            content: frame.content.clone(),
        }],
        FrameKind::ThinkingEnd => vec![SseEvent::ReasoningEnd],
        FrameKind::AnswerStart => vec![SseEvent::AnswerStart],
        FrameKind::Answer => vec![SseEvent::Chunk {
            content: frame.content.clone(),
        }],
        FrameKind::Done => vec![SseEvent::Done],
        FrameKind::Error => vec![
            SseEvent::ReasoningChunk {
                content: format!("处理出错: {}", frame.content),
            },
            SseEvent::ReasoningEnd,
            SseEvent::AnswerStart,
            SseEvent::Chunk {
                content: PROCESSING_ERROR_FALLBACK.to_string(),
            },
            SseEvent::Done,
        ],
    }
}

/// Canonical five-event recovery sequence for an unreachable or failed
/// upstream.
pub(crate) fn upstream_error_events(detail: &str) -> Vec<SseEvent> {
    vec![
        SseEvent::ReasoningChunk {
            content: format!("连接后端服务失败: {detail}"),
        },
        SseEvent::ReasoningEnd,
        SseEvent::AnswerStart,
        SseEvent::Chunk {
            content: UPSTREAM_ERROR_FALLBACK.to_string(),
        },
        SseEvent::Done,
    ]
}

fn heartbeat() -> SseEvent {
    SseEvent::Heartbeat {
        timestamp: Utc::now().to_rfc3339(),
    }
}

/// Sends a prepared sequence; false when the client is gone.
async fn emit_all(tx: &mpsc::Sender<SseEvent>, events: Vec<SseEvent>) -> bool {
    for event in events {
        if tx.send(event).await.is_err() {
            tracing::info!("客户端已断开连接，停止流式传输");
            return false;
        }
        tokio::time::sleep(EVENT_YIELD).await;
    }
    true
}

/// Drains one frame source into the SSE channel until a terminal frame, the
/// deadline, a transport error, or client disconnect.
pub(crate) async fn reframe<S: FrameSource>(
    mut source: S,
    tx: &mpsc::Sender<SseEvent>,
    deadline: Instant,
) {
    loop {
        // Disconnect poll before each read.
        if tx.is_closed() {
            tracing::info!("客户端已断开连接，停止流式传输");
            return;
        }

        let now = Instant::now();
        if now >= deadline {
            emit_all(tx, upstream_error_events("请求处理超时")).await;
            return;
        }
        let wait = HEARTBEAT_INTERVAL.min(deadline - now);

        match tokio::time::timeout(wait, source.next_frame()).await {
            // No frame inside the window: heartbeat (or deadline).
            Err(_) => {
                if Instant::now() >= deadline {
                    emit_all(tx, upstream_error_events("请求处理超时")).await;
                    return;
                }
                if tx.send(heartbeat()).await.is_err() {
                    tracing::info!("客户端已断开连接，停止流式传输");
                    return;
                }
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Agent 流读取失败");
                emit_all(tx, upstream_error_events(&e.to_string())).await;
                return;
            }
            // Upstream closed without a terminal frame: just stop.
            Ok(Ok(None)) => return,
            Ok(Ok(Some(frame))) => {
                let terminal = frame.chunk_type.is_terminal() || frame.is_last;
                if !emit_all(tx, translate_frame(&frame)).await {
                    return;
                }
                if terminal {
                    return;
                }
            }
        }
    }
}

/// One chat stream: the session_id event, then the agent connection and the
/// re-framing loop. Runs as a spawned task feeding the SSE response channel.
pub(crate) async fn run_chat_stream(
    agent_url: String,
    request: MessageRequest,
    tx: mpsc::Sender<SseEvent>,
    deadline: Instant,
) {
    let session_event = SseEvent::SessionId {
        session_id: request.session_id.clone(),
    };
    if tx.send(session_event).await.is_err() {
        return;
    }

    match AgentClient::new(agent_url).stream_message(request).await {
        Ok(source) => reframe(source, &tx, deadline).await,
        Err(e) => {
            tracing::error!(error = %e, "Agent 连接失败");
            emit_all(&tx, upstream_error_events(&e.to_string())).await;
        }
    }
}
