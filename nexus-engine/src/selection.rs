//! User-facing verbs over a context's membership.
//!
//! Thin orchestration: every verb verifies its preconditions against the
//! repositories and delegates scoring to the relevance scorer.

use crate::scorer::{RelevanceScorer, ScoringFactors};
use crate::tokens::SharedCounter;
use nexus_core::error::{NexusError, Result};
use nexus_core::traits::{ContentRepository, ContextRepository};
use nexus_core::types::{ContentItem, ContentType, ContextItemEdge, EdgePatch};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default context token budget when metadata carries no hint.
const DEFAULT_TOKEN_LIMIT: usize = 100_000;

/// Suggestions below this score are dropped.
const SUGGESTION_THRESHOLD: f32 = 0.1;

/// Token accounting for one content type within a context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeUsage {
    pub count: usize,
    pub tokens: usize,
}

/// Snapshot of a context's token accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionStatus {
    pub context_id: String,
    pub total_budget: usize,
    pub used_tokens: usize,
    pub remaining_tokens: usize,
    pub item_count: usize,
    pub by_type: HashMap<ContentType, TypeUsage>,
}

/// Sort order for suggestions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestSortBy {
    #[default]
    Relevance,
    Recency,
}

/// Options for the suggest operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestOptions {
    pub max_items: usize,
    pub sort_by: SuggestSortBy,
}

impl Default for SuggestOptions {
    fn default() -> Self {
        Self {
            max_items: 10,
            sort_by: SuggestSortBy::Relevance,
        }
    }
}

/// A suggested or similar item with its score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredItem {
    pub content: ContentItem,
    pub relevance: f32,
}

/// Mutations and queries over context membership.
pub struct SelectionService {
    contexts: Arc<dyn ContextRepository>,
    contents: Arc<dyn ContentRepository>,
    scorer: Arc<RelevanceScorer>,
    counter: SharedCounter,
}

impl SelectionService {
    pub fn new(
        contexts: Arc<dyn ContextRepository>,
        contents: Arc<dyn ContentRepository>,
        scorer: Arc<RelevanceScorer>,
        counter: SharedCounter,
    ) -> Self {
        Self {
            contexts,
            contents,
            scorer,
            counter,
        }
    }

    /// Token accounting per content type plus counts. The budget comes from
    /// the context's `tokenLimit` metadata or a 100k default.
    pub async fn status(
        &self,
        context_id: &str,
        cancel: &CancellationToken,
    ) -> Result<SelectionStatus> {
        if cancel.is_cancelled() {
            return Err(NexusError::Cancelled);
        }

        let context = self
            .contexts
            .find_by_id(context_id)
            .await?
            .ok_or_else(|| NexusError::not_found("context", context_id))?;
        let edges = self.contexts.list_items(context_id).await?;

        let mut by_type: HashMap<ContentType, TypeUsage> = HashMap::new();
        let mut used_tokens = 0usize;
        let mut item_count = 0usize;

        for edge in &edges {
            if cancel.is_cancelled() {
                return Err(NexusError::Cancelled);
            }
            let item = match self.contents.get_with_body(&edge.content_id).await {
                Ok(Some(item)) => item,
                Ok(None) => continue,
                Err(e) => {
                    warn!(content_id = %edge.content_id, error = %e, "item load failed during status");
                    continue;
                }
            };
            let tokens = self.counter.count(item.body_text());
            let usage = by_type.entry(item.content_type).or_default();
            usage.count += 1;
            usage.tokens += tokens;
            used_tokens += tokens;
            item_count += 1;
        }

        let total_budget = context.token_limit(DEFAULT_TOKEN_LIMIT);
        Ok(SelectionStatus {
            context_id: context_id.to_string(),
            total_budget,
            used_tokens,
            remaining_tokens: total_budget.saturating_sub(used_tokens),
            item_count,
            by_type,
        })
    }

    /// Add an item to a context as a user selection.
    pub async fn add(
        &self,
        context_id: &str,
        content_id: &str,
        relevance: Option<f32>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(NexusError::Cancelled);
        }
        if let Some(r) = relevance {
            validate_relevance(r)?;
        }

        self.contexts
            .find_by_id(context_id)
            .await?
            .ok_or_else(|| NexusError::not_found("context", context_id))?;
        self.contents
            .find_by_id(content_id)
            .await?
            .ok_or_else(|| NexusError::not_found("content", content_id))?;

        self.contexts
            .add_item(
                context_id,
                content_id,
                ContextItemEdge {
                    content_id: content_id.to_string(),
                    relevance,
                    selected_by_user: true,
                    added_at: chrono::Utc::now(),
                },
            )
            .await
    }

    /// Remove an item from a context. Idempotent.
    pub async fn remove(
        &self,
        context_id: &str,
        content_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(NexusError::Cancelled);
        }
        self.contexts
            .find_by_id(context_id)
            .await?
            .ok_or_else(|| NexusError::not_found("context", context_id))?;
        self.contexts.remove_item(context_id, content_id).await
    }

    /// Update an item's relevance hint within a context.
    pub async fn set_relevance(
        &self,
        context_id: &str,
        content_id: &str,
        relevance: f32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(NexusError::Cancelled);
        }
        validate_relevance(relevance)?;

        let edges = self.contexts.list_items(context_id).await?;
        if !edges.iter().any(|e| e.content_id == content_id) {
            return Err(NexusError::not_found("context item", content_id));
        }

        self.contexts
            .update_edge(
                context_id,
                content_id,
                EdgePatch {
                    relevance: Some(relevance),
                    selected_by_user: None,
                },
            )
            .await
    }

    /// Suggest project items for a context: everything not already a member,
    /// batch-scored against the query, filtered and sorted.
    pub async fn suggest(
        &self,
        project_id: &str,
        query: &str,
        context_id: Option<&str>,
        opts: &SuggestOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredItem>> {
        if cancel.is_cancelled() {
            return Err(NexusError::Cancelled);
        }

        let members: HashSet<String> = match context_id {
            Some(id) => self
                .contexts
                .list_items(id)
                .await?
                .into_iter()
                .map(|e| e.content_id)
                .collect(),
            None => HashSet::new(),
        };

        let items: Vec<ContentItem> = self
            .contents
            .list_by_project(project_id)
            .await?
            .into_iter()
            .filter(|item| !members.contains(&item.id))
            .collect();

        let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let factors = ScoringFactors::default();
        let scores = self.scorer.batch_score(&ids, query, &factors, cancel).await?;

        let mut suggestions: Vec<ScoredItem> = items
            .into_iter()
            .filter_map(|item| {
                let relevance = scores.get(&item.id).copied().unwrap_or(0.5);
                (relevance > SUGGESTION_THRESHOLD).then_some(ScoredItem {
                    content: item,
                    relevance,
                })
            })
            .collect();

        match opts.sort_by {
            SuggestSortBy::Relevance => suggestions.sort_by(|a, b| {
                b.relevance
                    .partial_cmp(&a.relevance)
                    .unwrap_or(Ordering::Equal)
            }),
            SuggestSortBy::Recency => {
                suggestions.sort_by(|a, b| b.content.created_at.cmp(&a.content.created_at))
            }
        }

        suggestions.truncate(opts.max_items);
        Ok(suggestions)
    }

    /// Nearest neighbors of an item's embedding.
    pub async fn find_similar(
        &self,
        content_id: &str,
        limit: usize,
        project_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredItem>> {
        if cancel.is_cancelled() {
            return Err(NexusError::Cancelled);
        }
        self.contents
            .find_by_id(content_id)
            .await?
            .ok_or_else(|| NexusError::not_found("content", content_id))?;

        let similar = self
            .contents
            .find_similar(content_id, limit, project_id)
            .await?;
        Ok(similar
            .into_iter()
            .map(|(content, relevance)| ScoredItem { content, relevance })
            .collect())
    }
}

fn validate_relevance(r: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&r) || r.is_nan() {
        return Err(NexusError::validation(
            "relevance",
            format!("{} is outside [0, 1]", r),
        ));
    }
    Ok(())
}
