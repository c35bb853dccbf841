//! End-to-end optimizer scenarios over the in-memory store.

use chrono::Utc;
use nexus_engine::chunker::{ChunkStrategy, Chunker};
use nexus_engine::optimizer::{ContextOptimizer, OptimizeOptions};
use nexus_engine::scorer::RelevanceScorer;
use nexus_engine::tokens::{HeuristicCounter, TokenCounter};
use nexus_core::error::NexusError;
use nexus_core::types::{ContentItem, ContentType, Context, ContextItemEdge, Metadata};
use nexus_storage::{HashEmbedder, InMemoryStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Fixture {
    store: Arc<InMemoryStore>,
    optimizer: ContextOptimizer,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let scorer = Arc::new(RelevanceScorer::new(
            store.clone(),
            store.clone(),
            Arc::new(HashEmbedder::default()),
        ));
        let optimizer = ContextOptimizer::new(
            store.clone(),
            store.clone(),
            scorer,
            HeuristicCounter::shared(),
        );
        Self { store, optimizer }
    }

    fn add_context(&self, id: &str) {
        self.store.put_context(Context {
            id: id.to_string(),
            project_id: "p1".to_string(),
            name: id.to_string(),
            created_at: Utc::now(),
            metadata: Metadata::new(),
        });
    }

    fn add_item(&self, id: &str, title: &str, body: &str, content_type: ContentType) {
        self.store.put_item(ContentItem {
            id: id.to_string(),
            project_id: "p1".to_string(),
            content_type,
            title: title.to_string(),
            body: Some(body.to_string()),
            created_at: Utc::now(),
            embedding_id: None,
            metadata: Metadata::new(),
        });
    }

    async fn link(&self, context_id: &str, content_id: &str, relevance: Option<f32>, pinned: bool) {
        use nexus_core::traits::ContextRepository;
        self.store
            .add_item(
                context_id,
                content_id,
                ContextItemEdge {
                    content_id: content_id.to_string(),
                    relevance,
                    selected_by_user: pinned,
                    added_at: Utc::now(),
                },
            )
            .await
            .unwrap();
    }
}

/// A body of exactly `tokens` one-token words.
fn body_of(tokens: usize) -> String {
    vec!["word"; tokens].join(" ")
}

#[tokio::test]
async fn budget_fit_without_compression() {
    let fx = Fixture::new();
    fx.add_context("ctx");
    // 3, 2, and 4 one-token words
    fx.add_item("a", "A", "one two six", ContentType::Text);
    fx.add_item("b", "B", "ten her", ContentType::Text);
    fx.add_item("c", "C", "a b c d", ContentType::Text);
    fx.link("ctx", "a", Some(0.9), false).await;
    fx.link("ctx", "b", Some(0.6), false).await;
    fx.link("ctx", "c", Some(0.2), false).await;

    let opts = OptimizeOptions {
        reserve_tokens: 80,
        relevance_threshold: 0.3,
        ..Default::default()
    };
    let result = fx
        .optimizer
        .optimize("ctx", "alpha", 100, &opts, &CancellationToken::new())
        .await
        .unwrap();

    let ids: Vec<&str> = result.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(result.total_tokens, 5);
    assert_eq!(result.remaining_tokens, 15);
    assert_eq!(result.original_content_count, 3);
    assert_eq!(result.selected_content_count, 2);
}

#[tokio::test]
async fn compression_triggers_on_tight_budget() {
    let fx = Fixture::new();
    fx.add_context("ctx");
    // Each item is 400 tokens; the second opens with a tiny lead paragraph
    // so text compression collapses it to almost nothing
    fx.add_item("high", "High", &body_of(400), ContentType::Text);
    let compressible = format!("lead\n\n{}", body_of(399));
    fx.add_item("low1", "Low 1", &compressible, ContentType::Text);
    fx.add_item("low2", "Low 2", &body_of(400), ContentType::Text);
    fx.link("ctx", "high", Some(0.9), false).await;
    fx.link("ctx", "low1", Some(0.3), false).await;
    fx.link("ctx", "low2", Some(0.3), false).await;

    let opts = OptimizeOptions {
        reserve_tokens: 0,
        compression_threshold: Some(700),
        ..Default::default()
    };
    let result = fx
        .optimizer
        .optimize("ctx", "anything", 1000, &opts, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.total_tokens <= 1000);
    let high = result.items.iter().find(|i| i.id == "high").unwrap();
    assert!(high.metadata.get("compressed").is_none());
    assert_eq!(high.tokens, 400);

    let low1 = result.items.iter().find(|i| i.id == "low1").unwrap();
    assert_eq!(low1.metadata.get("compressed"), Some(&serde_json::json!(true)));
    assert!(low1.tokens < 400);

    // The third item fits once compression freed the budget
    assert!(result.items.iter().any(|i| i.id == "low2"));
    let total: usize = result.items.iter().map(|i| i.tokens).sum();
    assert_eq!(total, result.total_tokens);
}

#[tokio::test]
async fn pinned_item_displaces_higher_scored() {
    let fx = Fixture::new();
    fx.add_context("ctx");
    fx.add_item("x", "X", &body_of(500), ContentType::Text);
    fx.add_item("y", "Y", &body_of(500), ContentType::Text);
    fx.link("ctx", "x", Some(0.1), true).await;
    fx.link("ctx", "y", Some(0.95), false).await;

    let opts = OptimizeOptions {
        reserve_tokens: 0,
        ..Default::default()
    };
    let result = fx
        .optimizer
        .optimize("ctx", "anything", 600, &opts, &CancellationToken::new())
        .await
        .unwrap();

    let ids: Vec<&str> = result.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["x"]);
    assert_eq!(result.total_tokens, 500);
    assert!(!result.items.iter().any(|i| i.id == "y"));
}

#[tokio::test]
async fn code_item_chunked_into_three_regions() {
    let counter = HeuristicCounter::new();
    let long_fn = |name: &str| {
        format!("fn {}() {{ {} }}", name, vec!["stmt"; 290].join(" "))
    };
    let code = format!(
        "{}\n/* {} */\n{}\n",
        long_fn("alpha"),
        vec!["note"; 48].join(" "),
        long_fn("beta"),
    );
    assert!(counter.count(&code) > 400);

    let chunker = Chunker::new(HeuristicCounter::shared());
    let chunks = chunker.chunk(&code, ChunkStrategy::CodeAware, 400);

    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(|c| c.tokens <= 400));
    let rebuilt: String = chunks.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(rebuilt, code);
}

#[tokio::test]
async fn oversized_item_emits_multiple_fragments() {
    let fx = Fixture::new();
    fx.add_context("ctx");
    fx.add_item("big", "Big", &body_of(2500), ContentType::Text);
    fx.link("ctx", "big", Some(0.9), false).await;

    let opts = OptimizeOptions {
        reserve_tokens: 0,
        max_chunk_tokens: 1000,
        ..Default::default()
    };
    let result = fx
        .optimizer
        .optimize("ctx", "anything", 10_000, &opts, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.items.len() >= 2);
    assert!(result.items.iter().all(|i| i.chunk_index.is_some()));
    assert!(result.items.iter().all(|i| i.tokens <= 1000));
}

#[tokio::test]
async fn empty_context_yields_empty_result() {
    let fx = Fixture::new();
    fx.add_context("ctx");

    let opts = OptimizeOptions {
        reserve_tokens: 100,
        ..Default::default()
    };
    let result = fx
        .optimizer
        .optimize("ctx", "anything", 1000, &opts, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.items.is_empty());
    assert_eq!(result.total_tokens, 0);
    assert_eq!(result.remaining_tokens, 900);
}

#[tokio::test]
async fn budget_below_reserve_is_validation_error() {
    let fx = Fixture::new();
    fx.add_context("ctx");

    let opts = OptimizeOptions {
        reserve_tokens: 800,
        ..Default::default()
    };
    let err = fx
        .optimizer
        .optimize("ctx", "anything", 500, &opts, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn missing_context_is_not_found() {
    let fx = Fixture::new();
    let err = fx
        .optimizer
        .optimize(
            "nope",
            "anything",
            1000,
            &OptimizeOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn all_candidates_below_threshold_is_empty_not_error() {
    let fx = Fixture::new();
    fx.add_context("ctx");
    fx.add_item("a", "A", "some text", ContentType::Text);
    fx.link("ctx", "a", Some(0.0), false).await;

    let opts = OptimizeOptions {
        reserve_tokens: 0,
        relevance_threshold: 0.9,
        ..Default::default()
    };
    let result = fx
        .optimizer
        .optimize("ctx", "anything", 1000, &opts, &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.items.is_empty());
    assert_eq!(result.total_tokens, 0);
}

#[tokio::test]
async fn token_accounting_invariants_hold() {
    let fx = Fixture::new();
    fx.add_context("ctx");
    for i in 0..8 {
        let id = format!("item-{}", i);
        fx.add_item(&id, &id, &body_of(50 + i * 17), ContentType::Text);
        fx.link("ctx", &id, Some(0.4 + 0.05 * i as f32), false).await;
    }

    let opts = OptimizeOptions {
        reserve_tokens: 50,
        ..Default::default()
    };
    let budget = 400;
    let result = fx
        .optimizer
        .optimize("ctx", "anything", budget, &opts, &CancellationToken::new())
        .await
        .unwrap();

    let sum: usize = result.items.iter().map(|i| i.tokens).sum();
    assert_eq!(sum, result.total_tokens);
    assert!(result.total_tokens <= budget - opts.reserve_tokens);
    assert_eq!(
        result.remaining_tokens,
        (budget - opts.reserve_tokens) - result.total_tokens
    );
}

#[tokio::test]
async fn batch_scoring_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    let scorer = RelevanceScorer::new(
        store.clone(),
        store.clone(),
        Arc::new(HashEmbedder::default()),
    );
    for i in 0..5 {
        store.put_item(ContentItem {
            id: format!("i{}", i),
            project_id: "p1".to_string(),
            content_type: ContentType::Text,
            title: format!("i{}", i),
            body: Some("text".to_string()),
            created_at: Utc::now(),
            embedding_id: None,
            metadata: Metadata::new(),
        });
        store.put_embedding(format!("i{}", i), vec![i as f32, 1.0, 0.5]);
    }

    let ids: Vec<String> = (0..5).map(|i| format!("i{}", i)).collect();
    let factors = Default::default();
    let cancel = CancellationToken::new();
    let first = scorer
        .batch_score(&ids, "the query", &factors, &cancel)
        .await
        .unwrap();
    let second = scorer
        .batch_score(&ids, "the query", &factors, &cancel)
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn cancellation_aborts_optimization() {
    let fx = Fixture::new();
    fx.add_context("ctx");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = fx
        .optimizer
        .optimize("ctx", "anything", 1000, &OptimizeOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, NexusError::Cancelled));
}

#[tokio::test]
async fn max_content_items_caps_selection() {
    let fx = Fixture::new();
    fx.add_context("ctx");
    for i in 0..10 {
        let id = format!("item-{}", i);
        fx.add_item(&id, &id, "tiny body", ContentType::Text);
        fx.link("ctx", &id, Some(0.8), false).await;
    }

    let opts = OptimizeOptions {
        reserve_tokens: 0,
        max_content_items: 4,
        ..Default::default()
    };
    let result = fx
        .optimizer
        .optimize("ctx", "anything", 10_000, &opts, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.items.len(), 4);
}
