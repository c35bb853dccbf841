//! Environment-driven configuration for the ContextNexus backend.
//!
//! All settings come from environment variables with serde-side defaults, so
//! a bare process starts with sensible values and deployments override only
//! what they need.
//!
//! | Variable | Meaning |
//! |---|---|
//! | `LLM_MODEL_CONFIGS` | JSON list of model configs for the dispatcher |
//! | `DEFAULT_MODEL_ID` | Registry default model |
//! | `OPTIMIZER_DEFAULT_BUDGET` | Token budget when the caller gives none |
//! | `OPTIMIZER_RESERVE_TOKENS` | Tokens reserved for query + response |
//! | `CIRCUIT_BREAK_THRESHOLD` | Failures within 60s that open a breaker |
//! | `CIRCUIT_BREAK_DURATION_MS` | Breaker cool-down before reset |
//! | `CONNECTOR_TIMEOUT_MS` | Per-call connector deadline |
//! | `NEXUS_HOST` / `NEXUS_PORT` | API bind address |

use crate::error::{NexusError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Registered configuration for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    /// Positive load-balancing weight
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Concurrency cap, at least 1
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Ordered failover chain of model ids
    #[serde(default)]
    pub failover_models: Vec<String>,
    #[serde(default)]
    pub cost_per_token: f64,
}

fn default_weight() -> f64 {
    1.0
}

fn default_max_concurrent() -> usize {
    4
}

impl ModelConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            weight: default_weight(),
            max_concurrent: default_max_concurrent(),
            failover_models: Vec::new(),
            cost_per_token: 0.0,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_failover(mut self, models: Vec<String>) -> Self {
        self.failover_models = models;
        self
    }
}

/// Process-wide settings assembled from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NexusConfig {
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default = "default_model_id")]
    pub default_model_id: String,
    #[serde(default = "default_budget")]
    pub optimizer_default_budget: usize,
    #[serde(default = "default_reserve_tokens")]
    pub optimizer_reserve_tokens: usize,
    #[serde(default = "default_circuit_threshold")]
    pub circuit_break_threshold: u32,
    #[serde(default = "default_circuit_duration_ms")]
    pub circuit_break_duration_ms: u64,
    #[serde(default = "default_connector_timeout_ms")]
    pub connector_timeout_ms: u64,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_model_id() -> String {
    "default".to_string()
}

fn default_budget() -> usize {
    8192
}

fn default_reserve_tokens() -> usize {
    800
}

fn default_circuit_threshold() -> u32 {
    5
}

fn default_circuit_duration_ms() -> u64 {
    30_000
}

fn default_connector_timeout_ms() -> u64 {
    30_000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            default_model_id: default_model_id(),
            optimizer_default_budget: default_budget(),
            optimizer_reserve_tokens: default_reserve_tokens(),
            circuit_break_threshold: default_circuit_threshold(),
            circuit_break_duration_ms: default_circuit_duration_ms(),
            connector_timeout_ms: default_connector_timeout_ms(),
            host: default_host(),
            port: default_port(),
        }
    }
}

impl NexusConfig {
    /// Build a configuration from the process environment.
    ///
    /// Malformed numeric overrides fall back to defaults with a warning;
    /// malformed `LLM_MODEL_CONFIGS` is a hard error since the dispatcher
    /// cannot guess a model fleet.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("LLM_MODEL_CONFIGS") {
            config.models = serde_json::from_str(&raw).map_err(|e| {
                NexusError::config(format!("LLM_MODEL_CONFIGS is not valid JSON: {}", e))
            })?;
        }

        if let Ok(id) = std::env::var("DEFAULT_MODEL_ID") {
            config.default_model_id = id;
        }

        config.optimizer_default_budget =
            env_parse("OPTIMIZER_DEFAULT_BUDGET", config.optimizer_default_budget);
        config.optimizer_reserve_tokens =
            env_parse("OPTIMIZER_RESERVE_TOKENS", config.optimizer_reserve_tokens);
        config.circuit_break_threshold =
            env_parse("CIRCUIT_BREAK_THRESHOLD", config.circuit_break_threshold);
        config.circuit_break_duration_ms =
            env_parse("CIRCUIT_BREAK_DURATION_MS", config.circuit_break_duration_ms);
        config.connector_timeout_ms =
            env_parse("CONNECTOR_TIMEOUT_MS", config.connector_timeout_ms);

        if let Ok(host) = std::env::var("NEXUS_HOST") {
            config.host = host;
        }
        config.port = env_parse("NEXUS_PORT", config.port);

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        for model in &self.models {
            if model.weight <= 0.0 {
                return Err(NexusError::config(format!(
                    "model {} has non-positive weight {}",
                    model.id, model.weight
                )));
            }
            if model.max_concurrent < 1 {
                return Err(NexusError::config(format!(
                    "model {} has max_concurrent < 1",
                    model.id
                )));
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable {}={:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}
