//! Agent service: accepts WebSocket connections speaking the tagged-JSON
//! agent protocol and streams `StreamFrame`s for each `Stream` request.

mod app;
mod connection;
mod process;
mod stream;

pub use app::{router, AppState};

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Binds and serves until the process is stopped. In-flight runs are
/// abandoned on shutdown; their frames go nowhere.
pub async fn run(addr: SocketAddr, state: Arc<AppState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Agent 服务已启动");
    serve_listener(listener, state).await
}

/// Serves on an already-bound listener (tests bind port 0 themselves).
pub async fn serve_listener(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}
