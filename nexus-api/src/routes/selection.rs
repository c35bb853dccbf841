//! Selection endpoints: context membership, suggestions, and similarity.

use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use nexus_engine::selection::{ScoredItem, SelectionStatus, SuggestOptions, SuggestSortBy};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddContentRequest {
    pub content_id: String,
    pub relevance: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRelevanceRequest {
    pub relevance: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionsRequest {
    pub query: String,
    pub context_id: Option<String>,
    #[serde(default)]
    pub options: SuggestionsRequestOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionsRequestOptions {
    pub max_items: Option<usize>,
    pub sort_by: Option<SuggestSortBy>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarParams {
    pub limit: Option<usize>,
    pub project_id: Option<String>,
}

/// `GET /selection/contexts/{id}/status`
pub async fn context_status(
    State(state): State<AppState>,
    Path(context_id): Path<String>,
) -> Result<Json<SelectionStatus>, ApiError> {
    let cancel = CancellationToken::new();
    let status = state.selection.status(&context_id, &cancel).await?;
    Ok(Json(status))
}

/// `POST /selection/contexts/{id}/content`
pub async fn add_content(
    State(state): State<AppState>,
    Path(context_id): Path<String>,
    Json(request): Json<AddContentRequest>,
) -> Result<Json<Value>, ApiError> {
    let cancel = CancellationToken::new();
    state
        .selection
        .add(&context_id, &request.content_id, request.relevance, &cancel)
        .await?;
    Ok(Json(json!({})))
}

/// `DELETE /selection/contexts/{id}/content/{cid}`
pub async fn remove_content(
    State(state): State<AppState>,
    Path((context_id, content_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let cancel = CancellationToken::new();
    state
        .selection
        .remove(&context_id, &content_id, &cancel)
        .await?;
    Ok(Json(json!({})))
}

/// `PUT /selection/contexts/{id}/content/{cid}/relevance`
pub async fn set_relevance(
    State(state): State<AppState>,
    Path((context_id, content_id)): Path<(String, String)>,
    Json(request): Json<SetRelevanceRequest>,
) -> Result<Json<Value>, ApiError> {
    let cancel = CancellationToken::new();
    state
        .selection
        .set_relevance(&context_id, &content_id, request.relevance, &cancel)
        .await?;
    Ok(Json(json!({})))
}

/// `POST /selection/projects/{pid}/suggestions`
pub async fn suggest(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<SuggestionsRequest>,
) -> Result<Json<Vec<ScoredItem>>, ApiError> {
    let cancel = CancellationToken::new();
    let mut opts = SuggestOptions::default();
    if let Some(max_items) = request.options.max_items {
        opts.max_items = max_items;
    }
    if let Some(sort_by) = request.options.sort_by {
        opts.sort_by = sort_by;
    }

    let suggestions = state
        .selection
        .suggest(
            &project_id,
            &request.query,
            request.context_id.as_deref(),
            &opts,
            &cancel,
        )
        .await?;
    Ok(Json(suggestions))
}

/// `GET /selection/content/{id}/similar?limit=&projectId=`
pub async fn find_similar(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
    Query(params): Query<SimilarParams>,
) -> Result<Json<Vec<ScoredItem>>, ApiError> {
    let cancel = CancellationToken::new();
    let similar = state
        .selection
        .find_similar(
            &content_id,
            params.limit.unwrap_or(10),
            params.project_id.as_deref(),
            &cancel,
        )
        .await?;
    Ok(Json(similar))
}
