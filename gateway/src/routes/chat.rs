//! `POST /api/chat/stream`: SSE chat streaming against the agent service.

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::post,
    Json, Router,
};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use stream_frame::MessageRequest;

use crate::app::AppState;
use crate::sse::{run_chat_stream, validate_message};

/// Event channel capacity. Small on purpose: the agent-facing task blocks
/// here when the browser reads slowly, extending back-pressure upstream.
const EVENT_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Deserialize)]
pub(crate) struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

pub(crate) fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat/stream", post(stream_chat))
}

async fn stream_chat(State(state): State<Arc<AppState>>, Json(req): Json<ChatRequest>) -> Response {
    if let Some(detail) = validate_message(&req.message) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"detail": detail})),
        )
            .into_response();
    }

    // A missing session id mints one; its event is always the first on the
    // stream.
    let session_id = match req.session_id.filter(|s| !s.is_empty()) {
        Some(id) => id,
        None => state.sessions.create(None).session_id,
    };
    if let Some(entry) = state.sessions.get(&session_id) {
        entry.record_message();
    }
    let model_id = state.sessions.get_model(&session_id).unwrap_or_default();

    let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let deadline = tokio::time::Instant::now() + state.request_timeout;
    tokio::spawn(run_chat_stream(
        state.agent_url.clone(),
        MessageRequest {
            session_id,
            user_input: req.message,
            model_id,
            stream: true,
        },
        tx,
        deadline,
    ));

    let stream = ReceiverStream::new(rx).map(|event| {
        Ok::<Event, Infallible>(Event::default().data(
            serde_json::to_string(&event).unwrap_or_else(|_| r#"{"type":"error"}"#.to_string()),
        ))
    });

    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
