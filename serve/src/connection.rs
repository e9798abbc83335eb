//! Per-connection protocol loop.
//!
//! Each text message on the socket is one [`AgentRequest`]. Health and unary
//! requests are answered in place; a stream request takes the socket over
//! until its terminal frame is out, then the loop resumes for the next
//! request. Malformed input earns one protocol error response and the
//! connection stays open — only transport failures end the loop.

use axum::extract::ws::{Message, WebSocket};
use std::sync::Arc;

use stream_frame::{AgentRequest, AgentResponse, ErrorResponse, HealthResponse};

use super::app::AppState;
use super::process::handle_process;
use super::stream::handle_stream;

pub(crate) type SendError = Box<dyn std::error::Error + Send + Sync>;

/// What the reader produced: a parsed request, junk, or end-of-connection.
enum Next {
    Request(AgentRequest),
    Malformed(String),
    Closed,
}

/// Reads frames until one carries a request payload. Pings and pongs are
/// answered by axum underneath; close frames and read failures end the
/// connection.
async fn next_request(socket: &mut WebSocket) -> Next {
    while let Some(received) = socket.recv().await {
        let frame = match received {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "连接读取失败，结束会话循环");
                return Next::Closed;
            }
        };
        let payload = match frame {
            Message::Text(text) => text,
            Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Message::Close(_) => return Next::Closed,
            _ => continue,
        };
        return match serde_json::from_str(&payload) {
            Ok(request) => Next::Request(request),
            Err(e) => Next::Malformed(format!("请求解析失败: {e}")),
        };
    }
    Next::Closed
}

fn health_response() -> AgentResponse {
    AgentResponse::Health(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "running".to_string(),
    })
}

/// Drives one client connection to completion.
pub(crate) async fn serve_connection(mut socket: WebSocket, state: Arc<AppState>) {
    loop {
        let request = match next_request(&mut socket).await {
            Next::Request(request) => request,
            Next::Malformed(detail) => {
                tracing::warn!(%detail, "丢弃无法解析的请求");
                let response = AgentResponse::Error(ErrorResponse { error: detail });
                if reply(&mut socket, &response).await.is_err() {
                    break;
                }
                continue;
            }
            Next::Closed => break,
        };

        let outcome = match request {
            AgentRequest::Health => reply(&mut socket, &health_response()).await,
            AgentRequest::Process(r) => {
                let response = handle_process(r, &state).await;
                reply(&mut socket, &response).await
            }
            AgentRequest::Stream(r) => handle_stream(r, &mut socket, &state).await,
        };

        if let Err(e) = outcome {
            tracing::info!(error = %e, "响应发送失败，关闭连接");
            break;
        }
    }
}

/// Serializes one response onto the socket.
pub(crate) async fn reply(socket: &mut WebSocket, response: &AgentResponse) -> Result<(), SendError> {
    let payload = serde_json::to_string(response)?;
    socket.send(Message::Text(payload)).await?;
    Ok(())
}
