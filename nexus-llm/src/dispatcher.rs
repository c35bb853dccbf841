//! LLM dispatch with weighted load balancing, circuit breaking, and
//! failover.
//!
//! Per-model state is a lock-free counter block plus a small mutex-guarded
//! breaker record; there is no cross-model lock. Concurrency slots are
//! reserved atomically at selection time and released by an RAII guard, so
//! `active_calls` never exceeds the configured cap under parallel dispatch.

use crate::connector::{LlmOptions, ModelConnector, ResponseChunk};
use crate::registry::ModelRegistry;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use nexus_core::config::ModelConfig;
use nexus_core::error::{NexusError, Result};
use nexus_engine::prompt::Prompt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Failures older than this fall out of the breaker window.
const FAILURE_WINDOW: Duration = Duration::from_secs(60);

/// Window for the default-fallback backpressure policy.
const FALLBACK_WINDOW: Duration = Duration::from_secs(1);

/// Default-fallback selections tolerated per window before failing fast.
const FALLBACK_LIMIT: usize = 3;

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Failures within the window that open a breaker
    pub circuit_breaker_threshold: u32,
    /// Breaker cool-down
    pub circuit_break_duration: Duration,
    /// Per-call connector deadline
    pub call_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold: 5,
            circuit_break_duration: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-call dispatch options.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    pub preferred_model_id: Option<String>,
    pub required_capabilities: Vec<String>,
    pub llm: LlmOptions,
}

/// Outcome of a successful dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    pub text: String,
    pub model_id: String,
    /// `(len(prompt) + len(response)) / 4` approximation
    pub tokens_used: usize,
}

/// Observable snapshot of one model's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub model_id: String,
    pub active_calls: usize,
    pub max_concurrent: usize,
    pub utilization: f64,
    pub total_calls: u64,
    pub success_calls: u64,
    pub failed_calls: u64,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub total_tokens: u64,
    pub is_circuit_broken: bool,
    /// Milliseconds until the breaker resets, when open
    pub circuit_reset_in_ms: Option<u64>,
}

/// Mutable per-model accounting. Counter updates are atomic; breaker
/// transitions hold the per-model mutex.
struct ModelState {
    config: ModelConfig,
    active_calls: AtomicUsize,
    total_calls: AtomicU64,
    success_calls: AtomicU64,
    failed_calls: AtomicU64,
    total_latency_ms: AtomicU64,
    total_tokens: AtomicU64,
    breaker: Mutex<Breaker>,
}

#[derive(Default)]
struct Breaker {
    recent_failures: VecDeque<Instant>,
    last_error_at: Option<Instant>,
    open_until: Option<Instant>,
}

impl ModelState {
    fn new(config: ModelConfig) -> Self {
        Self {
            config,
            active_calls: AtomicUsize::new(0),
            total_calls: AtomicU64::new(0),
            success_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            total_tokens: AtomicU64::new(0),
            breaker: Mutex::new(Breaker::default()),
        }
    }

    /// Breaker check with auto-reset: an expired cool-down transitions the
    /// model back to closed before selection sees it.
    fn is_open(&self) -> bool {
        let mut breaker = self.breaker.lock();
        match breaker.open_until {
            Some(until) if Instant::now() >= until => {
                breaker.open_until = None;
                breaker.recent_failures.clear();
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn record_success(&self, latency: Duration, tokens: usize) {
        self.success_calls.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        self.total_tokens.fetch_add(tokens as u64, Ordering::Relaxed);
    }

    fn record_failure(&self, threshold: u32, break_duration: Duration) {
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut breaker = self.breaker.lock();
        breaker.last_error_at = Some(now);
        breaker.recent_failures.push_back(now);
        while let Some(front) = breaker.recent_failures.front() {
            if now.duration_since(*front) > FAILURE_WINDOW {
                breaker.recent_failures.pop_front();
            } else {
                break;
            }
        }
        if breaker.recent_failures.len() >= threshold as usize {
            breaker.open_until = Some(now + break_duration);
            breaker.recent_failures.clear();
            warn!(model = %self.config.id, "circuit breaker opened");
        }
    }

    fn status(&self) -> ModelStatus {
        let active = self.active_calls.load(Ordering::Relaxed);
        let total = self.total_calls.load(Ordering::Relaxed);
        let success = self.success_calls.load(Ordering::Relaxed);
        let failed = self.failed_calls.load(Ordering::Relaxed);
        let latency = self.total_latency_ms.load(Ordering::Relaxed);

        let (is_open, reset_in) = {
            let breaker = self.breaker.lock();
            match breaker.open_until {
                Some(until) => {
                    let now = Instant::now();
                    if now >= until {
                        (false, None)
                    } else {
                        (true, Some(until.duration_since(now).as_millis() as u64))
                    }
                }
                None => (false, None),
            }
        };

        ModelStatus {
            model_id: self.config.id.clone(),
            active_calls: active,
            max_concurrent: self.config.max_concurrent,
            utilization: active as f64 / self.config.max_concurrent as f64,
            total_calls: total,
            success_calls: success,
            failed_calls: failed,
            success_rate: if success + failed > 0 {
                success as f64 / (success + failed) as f64
            } else {
                1.0
            },
            average_latency_ms: if success > 0 {
                latency as f64 / success as f64
            } else {
                0.0
            },
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
            is_circuit_broken: is_open,
            circuit_reset_in_ms: reset_in,
        }
    }

    fn reset(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.success_calls.store(0, Ordering::Relaxed);
        self.failed_calls.store(0, Ordering::Relaxed);
        self.total_latency_ms.store(0, Ordering::Relaxed);
        self.total_tokens.store(0, Ordering::Relaxed);
        let mut breaker = self.breaker.lock();
        breaker.recent_failures.clear();
        breaker.last_error_at = None;
        breaker.open_until = None;
    }
}

/// RAII reservation of one concurrency slot. Acquisition is a CAS against
/// the cap; the drop releases the slot on every exit path.
struct ActiveGuard {
    state: Arc<ModelState>,
}

impl ActiveGuard {
    fn try_acquire(state: &Arc<ModelState>) -> Option<Self> {
        let max = state.config.max_concurrent;
        state
            .active_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < max).then_some(current + 1)
            })
            .ok()?;
        Some(Self {
            state: state.clone(),
        })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.state.active_calls.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Selects models, executes prompts, and tracks per-model health.
pub struct LlmDispatcher {
    registry: Arc<ModelRegistry>,
    states: DashMap<String, Arc<ModelState>>,
    config: DispatcherConfig,
    fallback_events: Mutex<VecDeque<Instant>>,
}

impl LlmDispatcher {
    /// Build a dispatcher over an already-populated registry. Models without
    /// an explicit config get defaults.
    pub fn new(
        registry: Arc<ModelRegistry>,
        model_configs: Vec<ModelConfig>,
        config: DispatcherConfig,
    ) -> Self {
        let states = DashMap::new();
        for model_config in model_configs {
            states.insert(
                model_config.id.clone(),
                Arc::new(ModelState::new(model_config)),
            );
        }
        for id in registry.ids() {
            states
                .entry(id.clone())
                .or_insert_with(|| Arc::new(ModelState::new(ModelConfig::new(id))));
        }
        Self {
            registry,
            states,
            config,
            fallback_events: Mutex::new(VecDeque::new()),
        }
    }

    fn state(&self, id: &str) -> Arc<ModelState> {
        self.states
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(ModelState::new(ModelConfig::new(id))))
            .clone()
    }

    /// Dispatch a prompt: select a model, execute with a deadline, account
    /// the outcome, and walk the failover chain on failure.
    pub async fn dispatch(
        &self,
        prompt: &Prompt,
        opts: &DispatchOptions,
        cancel: &CancellationToken,
    ) -> Result<DispatchResult> {
        if cancel.is_cancelled() {
            return Err(NexusError::Cancelled);
        }

        let (model_id, connector, guard) = self.select(opts)?;
        let original = match self
            .attempt(&model_id, connector, guard, prompt, &opts.llm, cancel)
            .await
        {
            Ok(result) => return Ok(result),
            Err(NexusError::Cancelled) => return Err(NexusError::Cancelled),
            Err(e) => e,
        };

        // Failover chain: each entry attempted once, no recursion
        let chain = self.state(&model_id).config.failover_models.clone();
        for failover_id in chain {
            if cancel.is_cancelled() {
                return Err(NexusError::Cancelled);
            }
            let connector = match self.registry.get(&failover_id) {
                Ok(c) => c,
                Err(_) => {
                    warn!(model = %failover_id, "failover model not registered, skipping");
                    continue;
                }
            };
            let state = self.state(&failover_id);
            if state.is_open() {
                warn!(model = %failover_id, "failover model circuit is open, skipping");
                continue;
            }
            let Some(guard) = ActiveGuard::try_acquire(&state) else {
                warn!(model = %failover_id, "failover model at concurrency cap, skipping");
                continue;
            };
            match self
                .attempt(&failover_id, connector, guard, prompt, &opts.llm, cancel)
                .await
            {
                Ok(result) => {
                    debug!(model = %failover_id, "failover succeeded");
                    return Ok(result);
                }
                Err(NexusError::Cancelled) => return Err(NexusError::Cancelled),
                Err(e) => warn!(model = %failover_id, error = %e, "failover attempt failed"),
            }
        }

        Err(original)
    }

    /// Streaming dispatch. The concurrency slot is held for the stream's
    /// lifetime; dropping the stream (or cancellation) releases it.
    pub async fn dispatch_stream(
        &self,
        prompt: &Prompt,
        opts: &DispatchOptions,
        cancel: &CancellationToken,
    ) -> Result<(String, BoxStream<'static, Result<ResponseChunk>>)> {
        if cancel.is_cancelled() {
            return Err(NexusError::Cancelled);
        }

        let (model_id, connector, guard) = self.select(opts)?;
        let state = self.state(&model_id);
        let start = Instant::now();
        state.total_calls.fetch_add(1, Ordering::Relaxed);

        let inner = match connector.send_stream(prompt, &opts.llm).await {
            Ok(stream) => stream,
            Err(e) => {
                state.record_failure(
                    self.config.circuit_breaker_threshold,
                    self.config.circuit_break_duration,
                );
                return Err(e);
            }
        };

        let threshold = self.config.circuit_breaker_threshold;
        let break_duration = self.config.circuit_break_duration;
        let cancel = cancel.clone();
        let stream = async_stream::stream! {
            let _guard = guard;
            let mut inner = inner;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        yield Err(NexusError::Cancelled);
                        break;
                    }
                    next = inner.next() => match next {
                        Some(Ok(chunk)) => {
                            let done = matches!(chunk, ResponseChunk::Done { .. });
                            if let ResponseChunk::Done { tokens_used } = &chunk {
                                state.record_success(start.elapsed(), *tokens_used);
                            }
                            yield Ok(chunk);
                            if done {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            state.record_failure(threshold, break_duration);
                            yield Err(e);
                            break;
                        }
                        None => break,
                    }
                }
            }
        };

        Ok((model_id, stream.boxed()))
    }

    async fn attempt(
        &self,
        model_id: &str,
        connector: Arc<dyn ModelConnector>,
        guard: ActiveGuard,
        prompt: &Prompt,
        options: &LlmOptions,
        cancel: &CancellationToken,
    ) -> Result<DispatchResult> {
        let state = self.state(model_id);
        state.total_calls.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(NexusError::Cancelled),
            result = tokio::time::timeout(self.config.call_timeout, connector.send(prompt, options)) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => Err(NexusError::timeout(format!(
                        "model {} exceeded {}ms",
                        model_id,
                        self.config.call_timeout.as_millis()
                    ))),
                }
            }
        };
        drop(guard);

        match outcome {
            Ok(text) => {
                let tokens_used = (prompt.text_len() + text.len()) / 4;
                state.record_success(start.elapsed(), tokens_used);
                Ok(DispatchResult {
                    text,
                    model_id: model_id.to_string(),
                    tokens_used,
                })
            }
            Err(NexusError::Cancelled) => Err(NexusError::Cancelled),
            Err(e) => {
                state.record_failure(
                    self.config.circuit_breaker_threshold,
                    self.config.circuit_break_duration,
                );
                Err(e)
            }
        }
    }

    /// Model selection: the preferred model when eligible, else the highest
    /// `weight / (active + 1)` score among eligible models with lexicographic
    /// tie-break, else the registry default under the backpressure policy.
    fn select(
        &self,
        opts: &DispatchOptions,
    ) -> Result<(String, Arc<dyn ModelConnector>, ActiveGuard)> {
        if let Some(preferred) = &opts.preferred_model_id {
            if let Ok(connector) = self.registry.get(preferred) {
                let state = self.state(preferred);
                if !state.is_open() {
                    if let Some(guard) = ActiveGuard::try_acquire(&state) {
                        return Ok((preferred.clone(), connector, guard));
                    }
                }
            }
        }

        let mut candidates: Vec<(String, f64)> = Vec::new();
        for id in self.registry.ids() {
            let state = self.state(&id);
            if state.is_open() {
                continue;
            }
            if state.active_calls.load(Ordering::SeqCst) >= state.config.max_concurrent {
                continue;
            }
            if !opts.required_capabilities.is_empty() {
                let info = match self.registry.get(&id) {
                    Ok(connector) => connector.info(),
                    Err(_) => continue,
                };
                if !opts
                    .required_capabilities
                    .iter()
                    .all(|cap| info.capabilities.contains(cap))
                {
                    continue;
                }
            }
            let active = state.active_calls.load(Ordering::SeqCst);
            let score = state.config.weight / (active as f64 + 1.0);
            candidates.push((id, score));
        }

        // Highest score first; ids ascending within a score so ties resolve
        // to the lexicographically smallest id
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        for (id, _) in candidates {
            let state = self.state(&id);
            if let Some(guard) = ActiveGuard::try_acquire(&state) {
                let connector = self.registry.get(&id)?;
                return Ok((id, connector, guard));
            }
        }

        // Nothing eligible: fall back to the default under the fail-fast
        // backpressure policy
        self.record_fallback()?;
        let default_id = self.registry.default_id().to_string();
        warn!(model = %default_id, "no eligible model, falling back to registry default");
        let connector = self.registry.get(&default_id)?;
        let state = self.state(&default_id);
        if state.is_open() {
            return Err(NexusError::unavailable("all models are circuit-broken"));
        }
        let guard = ActiveGuard::try_acquire(&state).ok_or_else(|| {
            NexusError::unavailable("default model is at its concurrency cap")
        })?;
        Ok((default_id, connector, guard))
    }

    fn record_fallback(&self) -> Result<()> {
        let now = Instant::now();
        let mut events = self.fallback_events.lock();
        while let Some(front) = events.front() {
            if now.duration_since(*front) > FALLBACK_WINDOW {
                events.pop_front();
            } else {
                break;
            }
        }
        events.push_back(now);
        if events.len() > FALLBACK_LIMIT {
            return Err(NexusError::unavailable(
                "no eligible models: default fallback exhausted",
            ));
        }
        Ok(())
    }

    /// Snapshot of every known model's state, sorted by id.
    pub fn status(&self) -> Vec<ModelStatus> {
        let mut statuses: Vec<ModelStatus> =
            self.states.iter().map(|entry| entry.status()).collect();
        statuses.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        statuses
    }

    /// Zero all counters and close all breakers.
    pub fn reset_stats(&self) {
        for entry in self.states.iter() {
            entry.reset();
        }
        self.fallback_events.lock().clear();
    }
}
