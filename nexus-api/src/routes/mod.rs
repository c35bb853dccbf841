//! HTTP route handlers.

pub mod queries;
pub mod selection;

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use nexus_llm::dispatcher::ModelStatus;
use serde_json::{Value, json};

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /models/status`
pub async fn models_status(State(state): State<AppState>) -> Json<Vec<ModelStatus>> {
    Json(state.dispatcher.status())
}
