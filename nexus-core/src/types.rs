//! Core domain types shared across the ContextNexus backend.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A vector embedding.
pub type Vector = Vec<f32>;

/// Free-form metadata attached to items, contexts, and fragments.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Closed set of content types the engine understands.
///
/// Strategy selection over this variant is a total function; adding a type
/// requires touching every `match` on it, which is intentional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Code,
    Image,
    List,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
            Self::Image => "image",
            Self::List => "list",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored unit of user content.
///
/// The body is immutable once stored; only metadata may change. The body may
/// be absent on listing reads and materialized later through
/// `ContentRepository::get_with_body`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub project_id: String,
    pub content_type: ContentType,
    pub title: String,
    /// Preloaded body, absent until materialized
    pub body: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Reference into the vector index, if an embedding exists
    pub embedding_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ContentItem {
    /// Resolved body text, empty when not yet materialized.
    pub fn body_text(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }
}

/// A named, user-curated bundle of content items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Carries the `tokenLimit` hint among other entries
    #[serde(default)]
    pub metadata: Metadata,
}

impl Context {
    /// Token budget hint from metadata, or the given default.
    pub fn token_limit(&self, default: usize) -> usize {
        self.metadata
            .get("tokenLimit")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(default)
    }
}

/// Per-edge record on the context ↔ content many-to-many relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItemEdge {
    pub content_id: String,
    /// User-assigned relevance hint, absent when never set
    pub relevance: Option<f32>,
    /// Pinned by the user; always ordered ahead of scored items
    #[serde(default)]
    pub selected_by_user: bool,
    pub added_at: chrono::DateTime<chrono::Utc>,
}

/// Patch applied to a context edge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgePatch {
    pub relevance: Option<f32>,
    pub selected_by_user: Option<bool>,
}

/// Calculate cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = (a.iter().map(|x| x * x).sum::<f32>()).sqrt();
    let norm_b = (b.iter().map(|x| x * x).sum::<f32>()).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Normalize a vector to unit length in place.
pub fn normalize(v: &mut [f32]) {
    let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_relative_eq!(cosine_similarity(&a, &b), 1.0, epsilon = 1e-6);

        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert_relative_eq!(cosine_similarity(&a, &b), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0, 0.0];
        normalize(&mut v);
        assert_relative_eq!(v[0], 0.6, epsilon = 1e-6);
        assert_relative_eq!(v[1], 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_context_token_limit() {
        let mut ctx = Context {
            id: "ctx-1".into(),
            project_id: "p-1".into(),
            name: "test".into(),
            created_at: chrono::Utc::now(),
            metadata: Metadata::new(),
        };
        assert_eq!(ctx.token_limit(100_000), 100_000);

        ctx.metadata
            .insert("tokenLimit".into(), serde_json::json!(8192));
        assert_eq!(ctx.token_limit(100_000), 8192);
    }

    #[test]
    fn test_content_type_serde() {
        let ty: ContentType = serde_json::from_str("\"code\"").unwrap();
        assert_eq!(ty, ContentType::Code);
        assert_eq!(serde_json::to_string(&ContentType::List).unwrap(), "\"list\"");
    }
}
