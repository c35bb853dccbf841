//! In-memory store implementing every repository contract.
//!
//! Backs the server in standalone deployments and serves as the fixture for
//! integration tests. All maps are concurrent; edge lists keep insertion
//! order under a per-context lock.

use async_trait::async_trait;
use dashmap::DashMap;
use nexus_core::error::{NexusError, Result};
use nexus_core::traits::{ContentRepository, ContextRepository, Embedder, VectorRepository};
use nexus_core::types::{
    ContentItem, Context, ContextItemEdge, EdgePatch, Vector, cosine_similarity, normalize,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Concurrent in-memory backend for all repository traits.
#[derive(Default)]
pub struct InMemoryStore {
    items: DashMap<String, ContentItem>,
    contexts: DashMap<String, Context>,
    edges: DashMap<String, Arc<Mutex<Vec<ContextItemEdge>>>>,
    embeddings: DashMap<String, Vector>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a content item.
    pub fn put_item(&self, item: ContentItem) {
        self.items.insert(item.id.clone(), item);
    }

    /// Insert or replace a context.
    pub fn put_context(&self, context: Context) {
        self.edges
            .entry(context.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())));
        self.contexts.insert(context.id.clone(), context);
    }

    /// Store an embedding for a content item.
    pub fn put_embedding(&self, content_id: impl Into<String>, embedding: Vector) {
        self.embeddings.insert(content_id.into(), embedding);
    }

    fn edge_list(&self, context_id: &str) -> Option<Arc<Mutex<Vec<ContextItemEdge>>>> {
        self.edges.get(context_id).map(|e| e.value().clone())
    }
}

#[async_trait]
impl ContentRepository for InMemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<ContentItem>> {
        Ok(self.items.get(id).map(|item| {
            let mut item = item.clone();
            // Listing reads do not materialize bodies
            item.body = None;
            item
        }))
    }

    async fn get_with_body(&self, id: &str) -> Result<Option<ContentItem>> {
        Ok(self.items.get(id).map(|item| item.clone()))
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<ContentItem>> {
        let mut items: Vec<ContentItem> = self
            .items
            .iter()
            .filter(|entry| entry.project_id == project_id)
            .map(|entry| {
                let mut item = entry.clone();
                item.body = None;
                item
            })
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    async fn find_similar(
        &self,
        id: &str,
        limit: usize,
        project_id: Option<&str>,
    ) -> Result<Vec<(ContentItem, f32)>> {
        let anchor = self
            .embeddings
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| NexusError::not_found("embedding", id))?;

        let mut scored: Vec<(ContentItem, f32)> = self
            .items
            .iter()
            .filter(|entry| entry.id != id)
            .filter(|entry| project_id.is_none_or(|p| entry.project_id == p))
            .filter_map(|entry| {
                let embedding = self.embeddings.get(&entry.id)?;
                let similarity = cosine_similarity(&anchor, &embedding);
                let mut item = entry.clone();
                item.body = None;
                Some((item, similarity))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

#[async_trait]
impl ContextRepository for InMemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Context>> {
        Ok(self.contexts.get(id).map(|c| c.clone()))
    }

    async fn list_items(&self, context_id: &str) -> Result<Vec<ContextItemEdge>> {
        match self.edge_list(context_id) {
            Some(edges) => Ok(edges.lock().clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn add_item(
        &self,
        context_id: &str,
        content_id: &str,
        edge: ContextItemEdge,
    ) -> Result<()> {
        let edges = self
            .edge_list(context_id)
            .ok_or_else(|| NexusError::not_found("context", context_id))?;
        let mut edges = edges.lock();
        if edges.iter().any(|e| e.content_id == content_id) {
            return Err(NexusError::conflict(format!(
                "content {} already in context {}",
                content_id, context_id
            )));
        }
        edges.push(edge);
        Ok(())
    }

    async fn remove_item(&self, context_id: &str, content_id: &str) -> Result<()> {
        if let Some(edges) = self.edge_list(context_id) {
            edges.lock().retain(|e| e.content_id != content_id);
        }
        Ok(())
    }

    async fn update_edge(
        &self,
        context_id: &str,
        content_id: &str,
        patch: EdgePatch,
    ) -> Result<()> {
        let edges = self
            .edge_list(context_id)
            .ok_or_else(|| NexusError::not_found("context", context_id))?;
        let mut edges = edges.lock();
        let edge = edges
            .iter_mut()
            .find(|e| e.content_id == content_id)
            .ok_or_else(|| NexusError::not_found("context item", content_id))?;
        if let Some(r) = patch.relevance {
            edge.relevance = Some(r);
        }
        if let Some(s) = patch.selected_by_user {
            edge.selected_by_user = s;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorRepository for InMemoryStore {
    async fn find_embedding(&self, content_id: &str) -> Result<Option<Vector>> {
        Ok(self.embeddings.get(content_id).map(|e| e.clone()))
    }

    async fn similarity(&self, content_id: &str, query: &Vector) -> Result<Option<f32>> {
        Ok(self
            .embeddings
            .get(content_id)
            .map(|e| cosine_similarity(&e, query)))
    }
}

/// Deterministic hash-based embedder.
///
/// Reproducible vectors with no model dependency: the same text always
/// embeds identically, different texts diverge. Suitable for tests and
/// standalone deployments, not for semantic quality.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vector> {
        let hash = text
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));

        let mut embedding = vec![0.0; self.dimension];
        for (i, val) in embedding.iter_mut().enumerate() {
            let seed = hash.wrapping_add(i as u64);
            *val = ((seed % 1000) as f32 / 1000.0) - 0.5;
        }
        normalize(&mut embedding);
        Ok(embedding)
    }

    fn model_name(&self) -> &str {
        "hash-embedder"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nexus_core::types::{ContentType, Metadata};

    fn item(id: &str, project: &str) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            project_id: project.to_string(),
            content_type: ContentType::Text,
            title: id.to_string(),
            body: Some(format!("body of {}", id)),
            created_at: Utc::now(),
            embedding_id: None,
            metadata: Metadata::new(),
        }
    }

    fn context(id: &str) -> Context {
        Context {
            id: id.to_string(),
            project_id: "p1".to_string(),
            name: id.to_string(),
            created_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    fn edge(content_id: &str) -> ContextItemEdge {
        ContextItemEdge {
            content_id: content_id.to_string(),
            relevance: None,
            selected_by_user: false,
            added_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_find_by_id_hides_body() {
        let store = InMemoryStore::new();
        store.put_item(item("a", "p1"));

        let listed = ContentRepository::find_by_id(&store, "a").await.unwrap().unwrap();
        assert!(listed.body.is_none());

        let full = store.get_with_body("a").await.unwrap().unwrap();
        assert_eq!(full.body.as_deref(), Some("body of a"));
    }

    #[tokio::test]
    async fn test_duplicate_add_conflicts() {
        let store = InMemoryStore::new();
        store.put_context(context("ctx"));
        store.put_item(item("a", "p1"));

        store.add_item("ctx", "a", edge("a")).await.unwrap();
        let err = store.add_item("ctx", "a", edge("a")).await.unwrap_err();
        assert!(matches!(err, NexusError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_remove_idempotent() {
        let store = InMemoryStore::new();
        store.put_context(context("ctx"));
        store.put_item(item("a", "p1"));
        store.add_item("ctx", "a", edge("a")).await.unwrap();

        store.remove_item("ctx", "a").await.unwrap();
        store.remove_item("ctx", "a").await.unwrap();
        assert!(store.list_items("ctx").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edges_keep_insertion_order() {
        let store = InMemoryStore::new();
        store.put_context(context("ctx"));
        for id in ["c", "a", "b"] {
            store.put_item(item(id, "p1"));
            store.add_item("ctx", id, edge(id)).await.unwrap();
        }

        let edges = store.list_items("ctx").await.unwrap();
        let order: Vec<&str> = edges.iter().map(|e| e.content_id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_find_similar_ranks_by_cosine() {
        let store = InMemoryStore::new();
        for id in ["anchor", "near", "far"] {
            store.put_item(item(id, "p1"));
        }
        store.put_embedding("anchor", vec![1.0, 0.0]);
        store.put_embedding("near", vec![0.9, 0.1]);
        store.put_embedding("far", vec![0.0, 1.0]);

        let similar = store.find_similar("anchor", 2, None).await.unwrap();
        assert_eq!(similar[0].0.id, "near");
        assert_eq!(similar[1].0.id, "far");
    }

    #[tokio::test]
    async fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("hello").await.unwrap();
        let b = embedder.embed("hello").await.unwrap();
        let c = embedder.embed("different").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
