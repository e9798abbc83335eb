//! Health, readiness, and liveness probes.

use axum::{response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use crate::app::AppState;

pub(crate) fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/live", get(live))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "wayfarer-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn ready() -> impl IntoResponse {
    Json(json!({"ready": true}))
}

async fn live() -> impl IntoResponse {
    Json(json!({"alive": true}))
}
