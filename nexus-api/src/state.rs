//! Application state and wiring.

use nexus_core::config::NexusConfig;
use nexus_engine::optimizer::ContextOptimizer;
use nexus_engine::prompt::PromptBuilder;
use nexus_engine::scorer::RelevanceScorer;
use nexus_engine::selection::SelectionService;
use nexus_engine::tokens::HeuristicCounter;
use nexus_llm::connector::MockConnector;
use nexus_llm::dispatcher::{DispatcherConfig, LlmDispatcher};
use nexus_llm::registry::ModelRegistry;
use nexus_storage::{HashEmbedder, InMemoryStore};
use std::sync::Arc;
use std::time::Duration;

/// Shared handles behind every route handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<NexusConfig>,
    pub optimizer: Arc<ContextOptimizer>,
    pub prompt_builder: Arc<PromptBuilder>,
    pub dispatcher: Arc<LlmDispatcher>,
    pub selection: Arc<SelectionService>,
}

impl AppState {
    /// Standalone wiring over the in-memory store and mock connectors.
    /// Returns the store so callers (and tests) can seed content.
    pub fn standalone(config: NexusConfig) -> (Self, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(HashEmbedder::default());
        let counter = HeuristicCounter::shared();

        let scorer = Arc::new(RelevanceScorer::new(
            store.clone(),
            store.clone(),
            embedder,
        ));
        let optimizer = Arc::new(ContextOptimizer::new(
            store.clone(),
            store.clone(),
            scorer.clone(),
            counter.clone(),
        ));
        let selection = Arc::new(SelectionService::new(
            store.clone(),
            store.clone(),
            scorer,
            counter.clone(),
        ));
        let prompt_builder = Arc::new(PromptBuilder::new(counter));

        let mut registry = ModelRegistry::new(config.default_model_id.clone());
        for model in &config.models {
            registry.register(Arc::new(MockConnector::new(model.id.clone())));
        }
        if !registry.contains(config.default_model_id.as_str()) {
            registry.register(Arc::new(MockConnector::new(config.default_model_id.clone())));
        }

        let dispatcher = Arc::new(LlmDispatcher::new(
            Arc::new(registry),
            config.models.clone(),
            DispatcherConfig {
                circuit_breaker_threshold: config.circuit_break_threshold,
                circuit_break_duration: Duration::from_millis(config.circuit_break_duration_ms),
                call_timeout: Duration::from_millis(config.connector_timeout_ms),
            },
        ));

        (
            Self {
                config: Arc::new(config),
                optimizer,
                prompt_builder,
                dispatcher,
                selection,
            },
            store,
        )
    }
}
