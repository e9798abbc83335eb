//! HTTP gateway: re-frames the agent's frame stream as Server-Sent Events
//! and serves the session/model/health management surface.

mod agent;
mod app;
mod error;
mod routes;
mod sse;

pub use app::{router, AppState};
pub use error::GatewayError;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub async fn run(addr: SocketAddr, state: Arc<AppState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Gateway 已启动");
    serve_listener(listener, state).await
}

/// Serves on an already-bound listener (tests bind port 0 themselves).
pub async fn serve_listener(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}
