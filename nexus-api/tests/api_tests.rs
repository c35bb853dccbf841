//! HTTP surface tests over the standalone wiring.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use nexus_api::state::AppState;
use nexus_core::config::{ModelConfig, NexusConfig};
use nexus_core::types::{ContentItem, ContentType, Context, Metadata};
use nexus_storage::InMemoryStore;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

fn test_state() -> (AppState, Arc<InMemoryStore>) {
    let config = NexusConfig {
        models: vec![ModelConfig::new("mock-model")],
        default_model_id: "mock-model".to_string(),
        optimizer_default_budget: 4096,
        optimizer_reserve_tokens: 100,
        ..Default::default()
    };
    AppState::standalone(config)
}

fn seed(store: &InMemoryStore) {
    store.put_context(Context {
        id: "ctx-1".to_string(),
        project_id: "p1".to_string(),
        name: "test context".to_string(),
        created_at: Utc::now(),
        metadata: Metadata::new(),
    });
    for (id, body) in [("c1", "alpha beta gamma"), ("c2", "delta epsilon")] {
        store.put_item(ContentItem {
            id: id.to_string(),
            project_id: "p1".to_string(),
            content_type: ContentType::Text,
            title: id.to_string(),
            body: Some(body.to_string()),
            created_at: Utc::now(),
            embedding_id: None,
            metadata: Metadata::new(),
        });
    }
}

async fn send(state: AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = nexus_api::server::router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let (state, _) = test_state();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn query_round_trip() {
    let (state, store) = test_state();
    seed(&store);
    use nexus_core::traits::ContextRepository;
    store
        .add_item(
            "ctx-1",
            "c1",
            nexus_core::types::ContextItemEdge {
                content_id: "c1".to_string(),
                relevance: Some(0.9),
                selected_by_user: true,
                added_at: Utc::now(),
            },
        )
        .await
        .unwrap();

    let request = post_json(
        "/queries",
        json!({ "query": "what is alpha?", "contextId": "ctx-1" }),
    );
    let (status, body) = send(state, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["modelId"], "mock-model");
    assert_eq!(body["text"], "mock response from mock-model");
    assert!(body["tokensUsed"].as_u64().is_some());
}

#[tokio::test]
async fn query_unknown_context_is_404() {
    let (state, _) = test_state();
    let request = post_json("/queries", json!({ "query": "q", "contextId": "missing" }));
    let (status, body) = send(state, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn query_empty_is_400() {
    let (state, _) = test_state();
    let request = post_json("/queries", json!({ "query": "  ", "contextId": "ctx" }));
    let (status, body) = send(state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION");
    assert_eq!(body["error"]["field"], "query");
}

#[tokio::test]
async fn selection_membership_flow() {
    let (state, store) = test_state();
    seed(&store);

    // Add
    let request = post_json(
        "/selection/contexts/ctx-1/content",
        json!({ "contentId": "c1", "relevance": 0.7 }),
    );
    let (status, _) = send(state.clone(), request).await;
    assert_eq!(status, StatusCode::OK);

    // Duplicate add conflicts
    let request = post_json(
        "/selection/contexts/ctx-1/content",
        json!({ "contentId": "c1" }),
    );
    let (status, body) = send(state.clone(), request).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    // Status reflects the item
    let request = Request::builder()
        .uri("/selection/contexts/ctx-1/status")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(state.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["item_count"], 1);

    // Update relevance
    let request = Request::builder()
        .method("PUT")
        .uri("/selection/contexts/ctx-1/content/c1/relevance")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "relevance": 0.2 }).to_string()))
        .unwrap();
    let (status, _) = send(state.clone(), request).await;
    assert_eq!(status, StatusCode::OK);

    // Out-of-range relevance rejected
    let request = Request::builder()
        .method("PUT")
        .uri("/selection/contexts/ctx-1/content/c1/relevance")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "relevance": 1.5 }).to_string()))
        .unwrap();
    let (status, _) = send(state.clone(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Remove twice: both OK
    for _ in 0..2 {
        let request = Request::builder()
            .method("DELETE")
            .uri("/selection/contexts/ctx-1/content/c1")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(state.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
    }
}

#[tokio::test]
async fn suggestions_return_scored_items() {
    let (state, store) = test_state();
    seed(&store);

    let request = post_json(
        "/selection/projects/p1/suggestions",
        json!({ "query": "alpha", "options": { "maxItems": 5 } }),
    );
    let (status, body) = send(state, request).await;
    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().unwrap();
    assert!(!list.is_empty());
    assert!(list.iter().all(|s| s["relevance"].as_f64().unwrap() > 0.1));
}

#[tokio::test]
async fn models_status_lists_registered_models() {
    let (state, _) = test_state();
    let request = Request::builder()
        .uri("/models/status")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(state, request).await;
    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().unwrap();
    assert!(list.iter().any(|m| m["model_id"] == "mock-model"));
}
