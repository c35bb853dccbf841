//! In-memory storage backend for ContextNexus.
//!
//! Implements the `nexus-core` repository traits over concurrent maps, plus
//! a deterministic hash-based embedder. The production deployment swaps
//! these for adapters over real stores; tests and standalone mode use them
//! directly.

pub mod memory;

pub use memory::{HashEmbedder, InMemoryStore};
