//! LLM dispatch layer for ContextNexus.
//!
//! Connectors wrap model endpoints behind a uniform trait; the registry
//! names them and designates a default; the dispatcher selects among them
//! with weighted load balancing, enforces per-model concurrency caps, trips
//! circuit breakers on repeated failure, and walks failover chains.
//!
//! Construction order matters: build the registry first, then hand it to
//! the dispatcher. Connectors hold no reference back to either.

pub mod connector;
pub mod dispatcher;
pub mod registry;

pub use connector::{
    LlmOptions, MockConnector, ModelConnector, ModelInfo, OpenAiConfig, OpenAiConnector,
    ResponseChunk,
};
pub use dispatcher::{
    DispatchOptions, DispatchResult, DispatcherConfig, LlmDispatcher, ModelStatus,
};
pub use registry::ModelRegistry;
