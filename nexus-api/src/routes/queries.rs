//! Query execution: optimize, render, dispatch, and optionally stream.

use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use nexus_core::error::NexusError;
use nexus_engine::optimizer::OptimizeOptions;
use nexus_engine::prompt::PromptOptions;
use nexus_llm::connector::ResponseChunk;
use nexus_llm::dispatcher::DispatchOptions;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    pub context_id: String,
    #[serde(default)]
    pub options: QueryRequestOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequestOptions {
    pub model_id: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub text: String,
    pub tokens_used: usize,
    pub model_id: String,
}

/// `POST /queries`
pub async fn execute_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Response, ApiError> {
    if request.query.trim().is_empty() {
        return Err(NexusError::validation("query", "must not be empty").into());
    }

    let cancel = CancellationToken::new();
    let optimize_opts = OptimizeOptions {
        reserve_tokens: state.config.optimizer_reserve_tokens,
        ..Default::default()
    };
    let budget = state.config.optimizer_default_budget;

    let optimized = state
        .optimizer
        .optimize(
            &request.context_id,
            &request.query,
            budget,
            &optimize_opts,
            &cancel,
        )
        .await?;
    debug!(
        items = optimized.items.len(),
        tokens = optimized.total_tokens,
        "context optimized"
    );

    let model_type = request
        .options
        .model_id
        .clone()
        .unwrap_or_else(|| state.config.default_model_id.clone());
    let prompt = state.prompt_builder.build(
        &request.query,
        &optimized,
        &model_type,
        &PromptOptions::default(),
    );

    let dispatch_opts = DispatchOptions {
        preferred_model_id: request.options.model_id.clone(),
        required_capabilities: Vec::new(),
        llm: nexus_llm::connector::LlmOptions {
            max_tokens: request.options.max_tokens,
            temperature: request.options.temperature,
            stream: request.options.stream,
        },
    };

    if request.options.stream {
        let (_model_id, chunks) = state
            .dispatcher
            .dispatch_stream(&prompt, &dispatch_opts, &cancel)
            .await?;

        let events = chunks.map(|chunk| -> Result<Event, Infallible> {
            let payload = match chunk {
                Ok(ResponseChunk::Delta { text }) => serde_json::json!({ "text": text }),
                Ok(ResponseChunk::Done { tokens_used }) => {
                    serde_json::json!({ "done": true, "tokensUsed": tokens_used })
                }
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            };
            Ok(Event::default().data(payload.to_string()))
        });

        return Ok(Sse::new(events)
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    let result = state
        .dispatcher
        .dispatch(&prompt, &dispatch_opts, &cancel)
        .await?;

    Ok(Json(QueryResponse {
        text: result.text,
        tokens_used: result.tokens_used,
        model_id: result.model_id,
    })
    .into_response())
}
