//! Session management routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::app::AppState;

pub(crate) fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/session/new", post(create_session))
        .route("/sessions", get(list_sessions))
        .route("/session/:session_id", delete(delete_session))
        .route("/session/:session_id/name", put(update_name))
        .route("/session/:session_id/model", put(set_model).get(get_model))
        .route("/clear/:session_id", post(clear_messages))
}

fn not_found(detail: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"detail": detail}))).into_response()
}

#[derive(Debug, Deserialize)]
struct NewSessionQuery {
    #[serde(default)]
    name: Option<String>,
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NewSessionQuery>,
) -> Response {
    let summary = state.sessions.create(query.name);
    Json(json!({
        "success": true,
        "session_id": summary.session_id,
        "name": summary.name,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    include_empty: bool,
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let sessions = state.sessions.list(query.include_empty);
    Json(json!({
        "success": true,
        "total": sessions.len(),
        "sessions": sessions,
    }))
    .into_response()
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    if state.sessions.delete(&session_id) {
        Json(json!({"success": true})).into_response()
    } else {
        not_found("会话不存在")
    }
}

#[derive(Debug, Deserialize)]
struct UpdateNameRequest {
    name: String,
}

async fn update_name(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<UpdateNameRequest>,
) -> Response {
    match state.sessions.set_name(&session_id, req.name) {
        Ok(name) => Json(json!({"success": true, "name": name})).into_response(),
        Err(_) => not_found("会话不存在"),
    }
}

#[derive(Debug, Deserialize)]
struct SetModelRequest {
    model_id: String,
}

async fn set_model(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<SetModelRequest>,
) -> Response {
    if state.config.model(&req.model_id).is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": format!("未知模型: {}", req.model_id)})),
        )
            .into_response();
    }
    match state.sessions.set_model(&session_id, req.model_id) {
        Ok(model_id) => Json(json!({"success": true, "model_id": model_id})).into_response(),
        Err(_) => not_found("会话不存在"),
    }
}

async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    match state.sessions.get_model(&session_id) {
        Ok(model_id) => Json(json!({"success": true, "model_id": model_id})).into_response(),
        Err(_) => not_found("会话不存在"),
    }
}

async fn clear_messages(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    match state.sessions.clear_messages(&session_id).await {
        Ok(()) => Json(json!({"success": true})).into_response(),
        Err(_) => not_found("会话不存在"),
    }
}
