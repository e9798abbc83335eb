//! Gateway app state and router.

use axum::Router;
use std::sync::Arc;
use std::time::Duration;

use config::AppConfig;
use wayfarer::SessionStore;

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: Arc<SessionStore>,
    /// ws:// endpoint of the agent service.
    pub agent_url: String,
    /// End-to-end budget for one chat stream.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>) -> Self {
        let agent_url = format!("ws://{}:{}", config.rpc.host, config.rpc.port);
        let request_timeout = Duration::from_secs(config.web.request_timeout_secs);
        Self {
            sessions: Arc::new(SessionStore::new(Arc::clone(&config))),
            config,
            agent_url,
            request_timeout,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(super::routes::health::router())
        .nest("/api", super::routes::api_router())
        .with_state(state)
}
