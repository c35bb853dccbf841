//! Model registry.
//!
//! A mapping from model id to connector plus a designated default. The
//! registry is built first and injected into the dispatcher; connectors hold
//! no reference back.

use crate::connector::{ModelConnector, ModelInfo};
use nexus_core::error::{NexusError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Named connectors with a default.
pub struct ModelRegistry {
    connectors: HashMap<String, Arc<dyn ModelConnector>>,
    default_id: String,
}

impl ModelRegistry {
    pub fn new(default_id: impl Into<String>) -> Self {
        Self {
            connectors: HashMap::new(),
            default_id: default_id.into(),
        }
    }

    /// Register a connector under its advertised id. Re-registering an id
    /// replaces the previous connector.
    pub fn register(&mut self, connector: Arc<dyn ModelConnector>) {
        self.connectors.insert(connector.info().id, connector);
    }

    /// Look up a connector by id.
    pub fn get(&self, id: &str) -> Result<Arc<dyn ModelConnector>> {
        self.connectors
            .get(id)
            .cloned()
            .ok_or_else(|| NexusError::not_found("model", id))
    }

    /// Whether an id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.connectors.contains_key(id)
    }

    /// Enumerate registered models, sorted by id for stable iteration.
    pub fn list(&self) -> Vec<ModelInfo> {
        let mut infos: Vec<ModelInfo> = self.connectors.values().map(|c| c.info()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connectors.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The designated default connector.
    pub fn default_connector(&self) -> Result<Arc<dyn ModelConnector>> {
        self.get(&self.default_id)
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }
}
