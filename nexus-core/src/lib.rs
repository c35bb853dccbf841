//! Core types and contracts for the ContextNexus backend.
//!
//! This crate holds everything the engine, dispatch layer, and API surface
//! share: the domain model (content items, contexts, membership edges), the
//! error taxonomy, the repository and embedder traits that abstract the
//! persistent stores, and environment-driven configuration.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{ModelConfig, NexusConfig};
pub use error::{NexusError, Result};
pub use traits::{ContentRepository, ContextRepository, Embedder, VectorRepository};
pub use types::{
    ContentItem, ContentType, Context, ContextItemEdge, EdgePatch, Metadata, Vector,
    cosine_similarity, normalize,
};
