//! WebSocket client for the agent service: one connection per streaming
//! request, one `Stream` message out, an ordered frame sequence back.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use stream_frame::{AgentRequest, AgentResponse, MessageRequest, StreamFrame};

use super::error::GatewayError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pull-based frame source; the SSE re-framer polls it with a heartbeat
/// timeout.
#[async_trait]
pub(crate) trait FrameSource: Send {
    /// `Ok(None)` means the upstream closed without a terminal frame.
    async fn next_frame(&mut self) -> Result<Option<StreamFrame>, GatewayError>;
}

pub(crate) struct AgentClient {
    url: String,
}

impl AgentClient {
    pub(crate) fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Opens the stream: connect, send the request, hand back the reader.
    pub(crate) async fn stream_message(
        &self,
        req: MessageRequest,
    ) -> Result<AgentFrameStream, GatewayError> {
        let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&self.url))
            .await
            .map_err(|_| GatewayError::Connect("connect timeout".to_string()))?
            .map_err(|e| GatewayError::Connect(e.to_string()))?;
        let (mut write, read) = ws.split();

        let json = serde_json::to_string(&AgentRequest::Stream(req))
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;
        write
            .send(Message::Text(json))
            .await
            .map_err(|e| GatewayError::Connect(e.to_string()))?;

        Ok(AgentFrameStream {
            read,
            _write: write,
        })
    }
}

pub(crate) struct AgentFrameStream {
    read: SplitStream<WsStream>,
    /// Kept so the connection stays open for the read half.
    _write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSource for AgentFrameStream {
    async fn next_frame(&mut self) -> Result<Option<StreamFrame>, GatewayError> {
        loop {
            let Some(msg) = self.read.next().await else {
                return Ok(None);
            };
            let msg = msg.map_err(|e| GatewayError::Read(e.to_string()))?;
            if !msg.is_text() {
                continue;
            }
            let resp: AgentResponse = serde_json::from_str(msg.to_text().unwrap_or(""))
                .map_err(|e| GatewayError::Protocol(e.to_string()))?;
            match resp {
                AgentResponse::Frame(frame) => return Ok(Some(frame)),
                AgentResponse::Error(e) => return Err(GatewayError::Protocol(e.error)),
                // Unary/health responses never appear on a stream request.
                _ => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_agent_is_a_connect_error() {
        let client = AgentClient::new("ws://127.0.0.1:1");
        let err = client
            .stream_message(MessageRequest::default())
            .await
            .err()
            .expect("must fail");
        assert!(matches!(err, GatewayError::Connect(_)));
    }
}
