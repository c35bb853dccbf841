//! Relevance scoring for (content item, query) pairs.
//!
//! A score in `[0, 1]` combines vector similarity with content-type,
//! recency, interaction, and manual signals. Pinned items short-circuit to a
//! fixed high score; a manual relevance hint dominates the blended form.

use moka::future::Cache;
use nexus_core::error::{NexusError, Result};
use nexus_core::traits::{ContentRepository, Embedder, VectorRepository};
use nexus_core::types::{ContentType, Vector, cosine_similarity};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Score assigned when an item is pinned by the user.
const PINNED_SCORE: f32 = 0.9;

/// Neutral score for missing signals and per-item failures.
const NEUTRAL_SCORE: f32 = 0.5;

/// Items scored concurrently per batch wave.
const BATCH_SIZE: usize = 20;

/// Caller-supplied scoring signals, keyed by content id where per-item.
#[derive(Debug, Clone, Default)]
pub struct ScoringFactors {
    /// Overrides for the per-content-type weight table
    pub content_type_weights: Option<HashMap<ContentType, f32>>,
    /// User-assigned relevance hints
    pub manual_relevance: HashMap<String, f32>,
    /// Items pinned by the user
    pub selected_by_user: HashSet<String>,
    /// Recency signal, defaults to 1.0 when absent
    pub recency: HashMap<String, f32>,
    /// Interaction signal, defaults to 1.0 when absent
    pub interaction: HashMap<String, f32>,
}

impl ScoringFactors {
    fn type_weight(&self, content_type: ContentType) -> f32 {
        if let Some(w) = self
            .content_type_weights
            .as_ref()
            .and_then(|weights| weights.get(&content_type))
        {
            return *w;
        }
        match content_type {
            ContentType::Text | ContentType::List => 1.0,
            ContentType::Code => 1.2,
            ContentType::Image => 0.7,
        }
    }
}

/// Multi-signal relevance scorer.
pub struct RelevanceScorer {
    contents: Arc<dyn ContentRepository>,
    vectors: Arc<dyn VectorRepository>,
    embedder: Arc<dyn Embedder>,
    /// Query embeddings memoized across calls
    query_cache: Cache<String, Arc<Vector>>,
}

impl RelevanceScorer {
    pub fn new(
        contents: Arc<dyn ContentRepository>,
        vectors: Arc<dyn VectorRepository>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let query_cache = Cache::builder()
            .max_capacity(1024)
            .time_to_live(Duration::from_secs(300))
            .build();
        Self {
            contents,
            vectors,
            embedder,
            query_cache,
        }
    }

    /// Score one item against a query. Missing signals degrade to neutral
    /// values; the result is always within `[0, 1]`.
    pub async fn score(&self, content_id: &str, query: &str, factors: &ScoringFactors) -> f32 {
        let query_embedding = match self.query_embedding(query).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!(error = %e, "query embedding failed, degrading to neutral similarity");
                None
            }
        };
        self.score_with_embedding(content_id, query_embedding.as_deref(), factors)
            .await
    }

    /// Score many items. Ids are processed in waves of twenty; per-item
    /// failures yield the neutral score rather than failing the batch. The
    /// query is embedded once for the whole call.
    pub async fn batch_score(
        &self,
        content_ids: &[String],
        query: &str,
        factors: &ScoringFactors,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, f32>> {
        if cancel.is_cancelled() {
            return Err(NexusError::Cancelled);
        }

        let query_embedding = match self.query_embedding(query).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!(error = %e, "query embedding failed, scoring batch in degraded mode");
                None
            }
        };

        let mut scores = HashMap::with_capacity(content_ids.len());
        for wave in content_ids.chunks(BATCH_SIZE) {
            if cancel.is_cancelled() {
                return Err(NexusError::Cancelled);
            }
            let futures = wave.iter().map(|id| {
                let embedding = query_embedding.as_deref();
                async move {
                    let score = self.score_with_embedding(id, embedding, factors).await;
                    (id.clone(), score)
                }
            });
            for (id, score) in futures::future::join_all(futures).await {
                scores.insert(id, score);
            }
        }

        debug!(items = scores.len(), "batch scoring complete");
        Ok(scores)
    }

    async fn score_with_embedding(
        &self,
        content_id: &str,
        query_embedding: Option<&Vector>,
        factors: &ScoringFactors,
    ) -> f32 {
        // Rule 1: pinned items win outright
        if factors.selected_by_user.contains(content_id) {
            return PINNED_SCORE;
        }

        let similarity = self.similarity(content_id, query_embedding).await;

        // Rule 2: a manual hint dominates the blend
        if let Some(manual) = factors.manual_relevance.get(content_id) {
            let m = manual.clamp(0.0, 1.0);
            return (0.7 * m + 0.3 * similarity).clamp(0.0, 1.0);
        }

        // Rule 3: weighted composition
        let content_type = match self.contents.find_by_id(content_id).await {
            Ok(Some(item)) => item.content_type,
            Ok(None) => {
                warn!(content_id, "item missing during scoring, using neutral score");
                return NEUTRAL_SCORE;
            }
            Err(e) => {
                warn!(content_id, error = %e, "item load failed during scoring, using neutral score");
                return NEUTRAL_SCORE;
            }
        };

        let w = factors.type_weight(content_type);
        let r = factors
            .recency
            .get(content_id)
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or(1.0);
        let u = factors
            .interaction
            .get(content_id)
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or(1.0);

        (0.6 * similarity + 0.2 * w + 0.1 * r + 0.1 * u).clamp(0.0, 1.0)
    }

    /// Cosine similarity against the stored embedding, neutral when the item
    /// has no embedding or the lookup fails.
    async fn similarity(&self, content_id: &str, query_embedding: Option<&Vector>) -> f32 {
        let Some(query_embedding) = query_embedding else {
            return NEUTRAL_SCORE;
        };
        match self.vectors.find_embedding(content_id).await {
            Ok(Some(embedding)) => {
                let sim = cosine_similarity(&embedding, query_embedding);
                // Cosine lands in [-1, 1]; fold into [0, 1]
                ((sim + 1.0) / 2.0).clamp(0.0, 1.0)
            }
            Ok(None) => NEUTRAL_SCORE,
            Err(e) => {
                warn!(content_id, error = %e, "embedding lookup failed, using neutral similarity");
                NEUTRAL_SCORE
            }
        }
    }

    async fn query_embedding(&self, query: &str) -> Result<Arc<Vector>> {
        if let Some(cached) = self.query_cache.get(query).await {
            return Ok(cached);
        }
        let embedding = Arc::new(self.embedder.embed(query).await?);
        self.query_cache
            .insert(query.to_string(), embedding.clone())
            .await;
        Ok(embedding)
    }
}
