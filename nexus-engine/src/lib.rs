//! Context optimization engine for ContextNexus.
//!
//! This crate turns a user-curated context and a natural-language query into
//! a token-budgeted set of content fragments, then renders them into a
//! model-specific prompt:
//!
//! - **Token counting**: one deterministic scheme shared process-wide
//! - **Chunking**: content-type-aware strategies under a per-chunk cap
//! - **Scoring**: vector similarity blended with type, recency,
//!   interaction, and manual signals
//! - **Optimization**: budget-constrained greedy selection with an
//!   opportunistic compression pass
//! - **Prompt assembly**: chat and completion payload shapes
//! - **Selection service**: user-facing verbs over context membership
//!
//! All I/O flows through the repository traits in `nexus-core`; everything
//! else completes without yielding.

pub mod chunker;
pub mod compressor;
pub mod optimizer;
pub mod prompt;
pub mod scorer;
pub mod selection;
pub mod tokens;

pub use chunker::{ChunkStrategy, Chunker, ContentChunk};
pub use compressor::Compressor;
pub use optimizer::{ContextOptimizer, OptimizeOptions, OptimizedContentItem, OptimizedContext};
pub use prompt::{ChatMessage, Prompt, PromptBuilder, PromptOptions, Role};
pub use scorer::{RelevanceScorer, ScoringFactors};
pub use selection::{
    ScoredItem, SelectionService, SelectionStatus, SuggestOptions, SuggestSortBy, TypeUsage,
};
pub use tokens::{HeuristicCounter, SharedCounter, TokenCounter};
