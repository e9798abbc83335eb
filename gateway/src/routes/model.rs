//! Model catalog routes. Models whose api_key did not resolve (or still
//! carries a template marker) never appear in the public list.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

use crate::app::AppState;

pub(crate) fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/models", get(list_models))
        .route("/models/:model_id", get(get_model))
}

async fn list_models(State(state): State<Arc<AppState>>) -> Response {
    let models = state.config.available_models();
    Json(json!({"success": true, "models": models})).into_response()
}

async fn get_model(State(state): State<Arc<AppState>>, Path(model_id): Path<String>) -> Response {
    match state.config.model(&model_id) {
        Some(model) => {
            let summary = model.summary(&model_id);
            Json(json!({
                "success": true,
                "model_id": model_id,
                "name": summary.name,
                "provider": summary.provider,
                "model": summary.model,
                "temperature": model.temperature,
                "max_tokens": model.max_tokens,
            }))
            .into_response()
        }
        None => Json(json!({"success": false, "error": "Model not found"})).into_response(),
    }
}
