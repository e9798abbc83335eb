//! HTTP route modules.

pub(crate) mod chat;
pub(crate) mod health;
pub(crate) mod model;
pub(crate) mod session;

use axum::Router;
use std::sync::Arc;

use super::app::AppState;

pub(crate) fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(chat::router())
        .merge(session::router())
        .merge(model::router())
}
