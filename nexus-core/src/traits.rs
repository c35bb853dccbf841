//! Repository and embedder contracts consumed by the engine.
//!
//! Persistent stores live upstream; the core only depends on these traits.
//! Implementations must be safe for concurrent use (they own their pooling).

use crate::error::Result;
use crate::types::{ContentItem, Context, ContextItemEdge, EdgePatch, Vector};
use async_trait::async_trait;

/// Read access to stored content items.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Fetch an item without its body
    async fn find_by_id(&self, id: &str) -> Result<Option<ContentItem>>;

    /// Fetch an item with the body materialized
    async fn get_with_body(&self, id: &str) -> Result<Option<ContentItem>>;

    /// List all items of a project, bodies not materialized
    async fn list_by_project(&self, project_id: &str) -> Result<Vec<ContentItem>>;

    /// Vector-nearest-neighbor query around an item's embedding.
    /// Returns (item, similarity) pairs, best first.
    async fn find_similar(
        &self,
        id: &str,
        limit: usize,
        project_id: Option<&str>,
    ) -> Result<Vec<(ContentItem, f32)>>;
}

/// Access to contexts and their membership edges.
#[async_trait]
pub trait ContextRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Context>>;

    /// All edges of a context, in insertion order
    async fn list_items(&self, context_id: &str) -> Result<Vec<ContextItemEdge>>;

    async fn add_item(
        &self,
        context_id: &str,
        content_id: &str,
        edge: ContextItemEdge,
    ) -> Result<()>;

    /// Idempotent removal
    async fn remove_item(&self, context_id: &str, content_id: &str) -> Result<()>;

    async fn update_edge(
        &self,
        context_id: &str,
        content_id: &str,
        patch: EdgePatch,
    ) -> Result<()>;
}

/// Read access to stored embeddings.
#[async_trait]
pub trait VectorRepository: Send + Sync {
    /// Stored embedding for a content item, absent when never embedded
    async fn find_embedding(&self, content_id: &str) -> Result<Option<Vector>>;

    /// Similarity between an item's stored embedding and a query vector
    async fn similarity(&self, content_id: &str, query: &Vector) -> Result<Option<f32>>;
}

/// External embedding generator.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for text
    async fn embed(&self, text: &str) -> Result<Vector>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}
