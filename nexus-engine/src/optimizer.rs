//! Token-budget-constrained context optimization.
//!
//! Given a context id, a query, and a budget, the optimizer scores the
//! context's items, orders them (pinned first, then by score), chunks
//! oversized bodies, and greedily selects fragments until the budget is
//! exhausted, with a single opportunistic compression pass when the budget
//! tightens.

use crate::chunker::{ChunkStrategy, Chunker};
use crate::compressor::Compressor;
use crate::scorer::{RelevanceScorer, ScoringFactors};
use crate::tokens::SharedCounter;
use nexus_core::error::{NexusError, Result};
use nexus_core::traits::{ContentRepository, ContextRepository};
use nexus_core::types::{ContentItem, ContentType, Metadata};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fraction of the budget that triggers compression when exceeded.
const COMPRESSION_TRIGGER_RATIO: f64 = 0.7;

/// Compression target as a fraction of available tokens.
const COMPRESSION_TARGET_RATIO: f64 = 0.7;

/// Relevance at or above which a selected fragment is never compressed.
const HIGH_RELEVANCE: f32 = 0.5;

/// Tuning knobs for one optimization call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeOptions {
    /// Hard ceiling; defaults to the call's budget
    pub max_tokens: Option<usize>,
    /// Reserved for the query and the expected response
    pub reserve_tokens: usize,
    /// Order user-pinned items first
    pub include_user_selected: bool,
    /// Cap on selected fragments
    pub max_content_items: usize,
    /// Candidates scoring below this are dropped
    pub relevance_threshold: f32,
    /// Strategy when not choosing by content type
    pub default_chunk_strategy: ChunkStrategy,
    /// Pick the strategy from each item's content type
    pub chunk_by_content_type: bool,
    /// Hard cap per chunk
    pub max_chunk_tokens: usize,
    /// Allow the compression pass
    pub enable_compression: bool,
    /// Used tokens above which compression may trigger;
    /// defaults to 0.7 × budget
    pub compression_threshold: Option<usize>,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            max_tokens: None,
            reserve_tokens: 800,
            include_user_selected: true,
            max_content_items: 50,
            relevance_threshold: 0.1,
            default_chunk_strategy: ChunkStrategy::Paragraph,
            chunk_by_content_type: true,
            max_chunk_tokens: 1000,
            enable_compression: true,
            compression_threshold: None,
        }
    }
}

/// A fragment selected into an optimization result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizedContentItem {
    pub id: String,
    pub content: String,
    pub title: String,
    pub content_type: ContentType,
    pub tokens: usize,
    pub relevance: f32,
    /// Distinguishes multiple chunks of one source item
    pub chunk_index: Option<usize>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// The output of one optimization call. Request-scoped, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizedContext {
    pub items: Vec<OptimizedContentItem>,
    pub total_tokens: usize,
    pub remaining_tokens: usize,
    pub original_content_count: usize,
    pub selected_content_count: usize,
    pub query: String,
}

impl OptimizedContext {
    fn empty(query: &str, available: usize) -> Self {
        Self {
            items: Vec::new(),
            total_tokens: 0,
            remaining_tokens: available,
            original_content_count: 0,
            selected_content_count: 0,
            query: query.to_string(),
        }
    }

    /// True when the majority of selected fragments are code.
    pub fn is_code_majority(&self) -> bool {
        if self.items.is_empty() {
            return false;
        }
        let code = self
            .items
            .iter()
            .filter(|i| i.content_type == ContentType::Code)
            .count();
        code * 2 > self.items.len()
    }
}

struct Candidate {
    item: ContentItem,
    pinned: bool,
    score: f32,
}

/// Composes scoring, chunking, and compression under a token budget.
pub struct ContextOptimizer {
    contexts: Arc<dyn ContextRepository>,
    contents: Arc<dyn ContentRepository>,
    scorer: Arc<RelevanceScorer>,
    chunker: Chunker,
    compressor: Compressor,
    counter: SharedCounter,
}

impl ContextOptimizer {
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
            chunker: Chunker::new(counter.clone()),
            compressor: Compressor::new(counter.clone()),
            counter,
        }
    }

    /// Optimize a context against a query under `budget` tokens.
    ///
    /// Raises `NotFound` for a missing context and `Validation` when the
    /// budget cannot cover the reserve; per-item failures are skipped.
    pub async fn optimize(
        &self,
        context_id: &str,
        query: &str,
        budget: usize,
        opts: &OptimizeOptions,
        cancel: &CancellationToken,
    ) -> Result<OptimizedContext> {
        if cancel.is_cancelled() {
            return Err(NexusError::Cancelled);
        }

        let max_tokens = opts.max_tokens.unwrap_or(budget);
        if max_tokens < opts.reserve_tokens {
            return Err(NexusError::validation(
                "budget",
                format!(
                    "budget {} cannot cover reserve of {} tokens",
                    max_tokens, opts.reserve_tokens
                ),
            ));
        }
        let available = max_tokens - opts.reserve_tokens;

        self.contexts
            .find_by_id(context_id)
            .await?
            .ok_or_else(|| NexusError::not_found("context", context_id))?;
        let edges = self.contexts.list_items(context_id).await?;
        if edges.is_empty() {
            return Ok(OptimizedContext::empty(query, available));
        }

        // Load candidates; a failing item is skipped, not fatal
        let mut items = Vec::with_capacity(edges.len());
        for edge in &edges {
            if cancel.is_cancelled() {
                return Err(NexusError::Cancelled);
            }
            match self.contents.find_by_id(&edge.content_id).await {
                Ok(Some(item)) => items.push(item),
                Ok(None) => warn!(content_id = %edge.content_id, "context references missing item, skipping"),
                Err(e) => warn!(content_id = %edge.content_id, error = %e, "item load failed, skipping"),
            }
        }

        let mut factors = ScoringFactors::default();
        for edge in &edges {
            if let Some(r) = edge.relevance {
                factors.manual_relevance.insert(edge.content_id.clone(), r);
            }
            if opts.include_user_selected && edge.selected_by_user {
                factors.selected_by_user.insert(edge.content_id.clone());
            }
        }

        let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let scores = match self.scorer.batch_score(&ids, query, &factors, cancel).await {
            Ok(scores) => scores,
            Err(NexusError::Cancelled) => return Err(NexusError::Cancelled),
            Err(e) => {
                warn!(error = %e, "batch scoring failed, proceeding in degraded mode");
                ids.iter().map(|id| (id.clone(), 0.5)).collect()
            }
        };

        let original_content_count = edges.len();
        let mut candidates: Vec<Candidate> = items
            .into_iter()
            .filter_map(|item| {
                let score = scores.get(&item.id).copied().unwrap_or(0.5);
                if score < opts.relevance_threshold {
                    return None;
                }
                let pinned = factors.selected_by_user.contains(&item.id);
                Some(Candidate {
                    item,
                    pinned,
                    score,
                })
            })
            .collect();

        // Pinned first, then score descending; the sort is stable so
        // insertion order breaks ties within one call
        candidates.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then(b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
        });

        let compression_threshold = opts
            .compression_threshold
            .unwrap_or((COMPRESSION_TRIGGER_RATIO * max_tokens as f64) as usize);

        let mut selected: Vec<OptimizedContentItem> = Vec::new();
        let mut used_tokens = 0usize;
        let mut compression_applied = false;

        'candidates: for candidate in candidates {
            if selected.len() >= opts.max_content_items {
                break;
            }
            if cancel.is_cancelled() {
                return Err(NexusError::Cancelled);
            }

            let item = match self.materialize(candidate.item).await {
                Some(item) => item,
                None => continue,
            };
            let body = item.body_text();
            if body.trim().is_empty() {
                continue;
            }

            let fragments = self.fragment(body, item.content_type, opts);
            for (content, tokens, chunk_index) in fragments {
                if selected.len() >= opts.max_content_items {
                    break 'candidates;
                }

                if used_tokens + tokens <= available {
                    selected.push(self.fragment_item(&item, content, tokens, chunk_index, candidate.score));
                    used_tokens += tokens;
                    continue;
                }

                if opts.enable_compression
                    && !compression_applied
                    && used_tokens > compression_threshold
                {
                    used_tokens = self.compression_pass(&mut selected, available, opts.max_chunk_tokens);
                    compression_applied = true;
                    if used_tokens + tokens <= available {
                        selected.push(self.fragment_item(&item, content, tokens, chunk_index, candidate.score));
                        used_tokens += tokens;
                        continue;
                    }
                }

                // Fragment does not fit; abandon the rest of this item
                continue 'candidates;
            }
        }

        debug!(
            selected = selected.len(),
            used_tokens,
            available,
            compression_applied,
            "optimization complete"
        );

        Ok(OptimizedContext {
            total_tokens: used_tokens,
            remaining_tokens: available - used_tokens,
            original_content_count,
            selected_content_count: selected.len(),
            query: query.to_string(),
            items: selected,
        })
    }

    async fn materialize(&self, item: ContentItem) -> Option<ContentItem> {
        if item.body.is_some() {
            return Some(item);
        }
        match self.contents.get_with_body(&item.id).await {
            Ok(Some(item)) => Some(item),
            Ok(None) => {
                warn!(content_id = %item.id, "item body vanished, skipping");
                None
            }
            Err(e) => {
                warn!(content_id = %item.id, error = %e, "body load failed, skipping");
                None
            }
        }
    }

    /// One fragment when the body fits the chunk cap, otherwise the
    /// strategy-appropriate chunking.
    fn fragment(
        &self,
        body: &str,
        content_type: ContentType,
        opts: &OptimizeOptions,
    ) -> Vec<(String, usize, Option<usize>)> {
        let tokens = self.counter.count(body);
        if tokens <= opts.max_chunk_tokens {
            return vec![(body.to_string(), tokens, None)];
        }

        let strategy = if opts.chunk_by_content_type {
            ChunkStrategy::for_content_type(content_type)
        } else {
            opts.default_chunk_strategy
        };
        self.chunker
            .chunk(body, strategy, opts.max_chunk_tokens)
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| (chunk.content, chunk.tokens, Some(i)))
            .collect()
    }

    fn fragment_item(
        &self,
        item: &ContentItem,
        content: String,
        tokens: usize,
        chunk_index: Option<usize>,
        relevance: f32,
    ) -> OptimizedContentItem {
        OptimizedContentItem {
            id: item.id.clone(),
            content,
            title: item.title.clone(),
            content_type: item.content_type,
            tokens,
            relevance,
            chunk_index,
            metadata: Metadata::new(),
        }
    }

    /// Compress low-relevance fragments in place until total tokens fall
    /// below the target. High-relevance fragments are untouched and relative
    /// order is preserved. A compressed fragment still over the chunk cap is
    /// re-split with the fixed-size scheme.
    fn compression_pass(
        &self,
        selected: &mut Vec<OptimizedContentItem>,
        available: usize,
        max_chunk_tokens: usize,
    ) -> usize {
        let target = (COMPRESSION_TARGET_RATIO * available as f64) as usize;
        let mut total: usize = selected.iter().map(|i| i.tokens).sum();

        let fragments = std::mem::take(selected);
        for mut fragment in fragments {
            if total < target || fragment.relevance >= HIGH_RELEVANCE {
                selected.push(fragment);
                continue;
            }

            let compressed = self
                .compressor
                .compress(&fragment.content, fragment.content_type);
            let new_tokens = self.counter.count(&compressed);
            if new_tokens >= fragment.tokens {
                selected.push(fragment);
                continue;
            }

            total = total - fragment.tokens + new_tokens;

            if new_tokens > max_chunk_tokens {
                for (i, chunk) in self
                    .chunker
                    .chunk(&compressed, ChunkStrategy::FixedSize, max_chunk_tokens)
                    .into_iter()
                    .enumerate()
                {
                    let mut piece = fragment.clone();
                    piece.content = chunk.content;
                    piece.tokens = chunk.tokens;
                    piece.chunk_index = Some(i);
                    piece.metadata.insert("compressed".into(), serde_json::json!(true));
                    selected.push(piece);
                }
                continue;
            }

            fragment.content = compressed;
            fragment.tokens = new_tokens;
            fragment
                .metadata
                .insert("compressed".into(), serde_json::json!(true));
            selected.push(fragment);
        }

        total
    }
}
