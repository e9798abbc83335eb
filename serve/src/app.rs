//! Service wiring: the shared session store behind one WebSocket endpoint.
//!
//! The agent speaks its whole protocol over a single upgraded socket, so the
//! router has exactly one route; everything interesting happens in
//! [`super::connection`] after the upgrade.

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;

use wayfarer::SessionStore;

use super::connection::serve_connection;

pub struct AppState {
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/", get(upgrade)).with_state(state)
}

async fn upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_connection(socket, state))
}
