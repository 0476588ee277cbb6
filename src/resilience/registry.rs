//! Breaker registry: one breaker per command key, created lazily.
//!
//! # Responsibilities
//! - Get-or-create the [`CommandBreaker`] bound to a command key
//! - Merge partial config updates into a breaker's live snapshot
//! - Manual reset of a breaker (CLOSED + empty window)
//! - Status and metrics queries across all keys
//!
//! # Design Decisions
//! - The registry is an ordinary value owned by the application and passed
//!   around (usually as `Arc<BreakerRegistry>`); there is no global instance
//! - DashMap entry API gives get-or-create semantics: concurrent creators of
//!   the same key all receive the single winning instance
//! - Config is an `ArcSwap` snapshot read on every evaluation; writers are
//!   serialized per breaker so concurrent patches never lose fields

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::config::schema::{BreakerConfig, BreakerConfigPatch, EngineConfig};
use crate::config::validation::{validate_breaker, ValidationError};
use crate::resilience::bulkhead::Bulkhead;
use crate::resilience::circuit_breaker::{Admission, CircuitBreaker, CircuitState};
use crate::resilience::window::{MetricsWindow, Outcome};
use crate::observability::metrics;

/// Identity of a protected operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandKey {
    name: String,
    group: String,
}

impl CommandKey {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reporting-only grouping label.
    pub fn group(&self) -> &str {
        &self.group
    }
}

/// Errors from registry administration.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    #[error("invalid config for command `{command}`: {}", describe(.errors))]
    InvalidConfig {
        command: String,
        errors: Vec<ValidationError>,
    },
}

fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result of the status query for one command.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BreakerStatus {
    pub command: String,
    pub group: String,
    pub state: CircuitState,
    pub allow_request: bool,
}

/// Result of the metrics query for one command.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BreakerMetrics {
    pub command: String,
    pub group: String,
    pub failure_rate: f64,
    pub volume: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub timeout_count: u64,
    pub short_circuited_count: u64,
    pub in_flight: usize,
}

/// Everything the engine keeps for one command key.
#[derive(Debug)]
pub struct CommandBreaker {
    key: CommandKey,
    config: ArcSwap<BreakerConfig>,
    update_lock: Mutex<()>,
    window: MetricsWindow,
    circuit: CircuitBreaker,
    bulkhead: Arc<Bulkhead>,
}

/// Shared handle to a command's breaker.
pub type BreakerHandle = Arc<CommandBreaker>;

impl CommandBreaker {
    pub fn new(key: CommandKey, config: BreakerConfig) -> Self {
        let window = MetricsWindow::new(
            config.rolling_window(),
            config.rolling_window_buckets as usize,
        );
        let circuit = CircuitBreaker::new(key.name());
        Self {
            key,
            config: ArcSwap::from_pointee(config),
            update_lock: Mutex::new(()),
            window,
            circuit,
            bulkhead: Arc::new(Bulkhead::new()),
        }
    }

    pub fn key(&self) -> &CommandKey {
        &self.key
    }

    /// Current config snapshot.
    pub fn config(&self) -> Arc<BreakerConfig> {
        self.config.load_full()
    }

    pub fn state(&self) -> CircuitState {
        self.circuit.state()
    }

    pub fn window(&self) -> &MetricsWindow {
        &self.window
    }

    pub fn bulkhead(&self) -> &Arc<Bulkhead> {
        &self.bulkhead
    }

    /// Admission check for one call (state-mutating, see [`CircuitBreaker::allow_request`]).
    pub fn allow_request(&self) -> Admission {
        self.circuit.allow_request(&self.config.load())
    }

    /// Return an admitted-but-unexecuted trial.
    pub fn abort_trial(&self, admission: Admission) {
        if let Admission::Trial(generation) = admission {
            self.circuit.abort_trial(generation);
        }
    }

    /// Record an outcome; the state machine evaluates it before returning.
    pub fn record(&self, outcome: Outcome, admission: Admission) {
        let config = self.config.load();
        self.circuit
            .on_outcome(outcome.kind, admission, &self.window, &config);
        metrics::record_call(self.key.name(), outcome.kind, outcome.latency);
    }

    /// Record the outcome of a call whose caller already gave up on it.
    pub fn record_abandoned(&self, outcome: Outcome) {
        tracing::debug!(
            command = %self.key.name(),
            outcome = outcome.kind.as_str(),
            latency_ms = outcome.latency.as_millis() as u64,
            "Abandoned call completed in background"
        );
        self.record(outcome, Admission::Permitted);
    }

    /// Pure status read.
    pub fn status(&self) -> BreakerStatus {
        BreakerStatus {
            command: self.key.name().to_string(),
            group: self.key.group().to_string(),
            state: self.circuit.state(),
            allow_request: self.circuit.peek_allow(&self.config.load()),
        }
    }

    pub fn metrics(&self) -> BreakerMetrics {
        let counts = self.window.counts();
        BreakerMetrics {
            command: self.key.name().to_string(),
            group: self.key.group().to_string(),
            failure_rate: counts.error_rate(),
            volume: counts.volume(),
            success_count: counts.success,
            failure_count: counts.failure,
            timeout_count: counts.timeout,
            short_circuited_count: counts.short_circuited,
            in_flight: self.bulkhead.active(),
        }
    }

    /// Merge `patch` into the live config.
    ///
    /// The merged config is validated first; on error nothing changes. An
    /// in-progress open period keeps its deadline; new thresholds apply from
    /// the next evaluation.
    pub fn update_config(
        &self,
        patch: &BreakerConfigPatch,
    ) -> Result<Vec<&'static str>, RegistryError> {
        let _guard = self.update_lock.lock().expect("config update mutex poisoned");
        let mut next = BreakerConfig::clone(&self.config.load());
        let changed = patch.apply(&mut next);
        if changed.is_empty() {
            return Ok(changed);
        }

        validate_breaker(self.key.name(), &next).map_err(|errors| {
            RegistryError::InvalidConfig {
                command: self.key.name().to_string(),
                errors,
            }
        })?;

        self.config.store(Arc::new(next));
        tracing::info!(
            command = %self.key.name(),
            changed = ?changed,
            "Breaker config updated"
        );
        Ok(changed)
    }

    /// Force CLOSED and clear the rolling window.
    pub fn reset(&self) {
        self.circuit.reset(&self.window);
    }
}

/// Owns one [`CommandBreaker`] per command key.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: DashMap<String, BreakerHandle>,
    settings: ArcSwap<EngineConfig>,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl BreakerRegistry {
    /// Create a registry whose new breakers take their config from `settings`.
    pub fn new(settings: EngineConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            settings: ArcSwap::from_pointee(settings),
        }
    }

    /// Get the breaker for `key`, creating it with `config` if absent.
    ///
    /// `config` is only used by the creator; an existing breaker keeps its own.
    pub fn get(&self, key: &CommandKey, config: BreakerConfig) -> BreakerHandle {
        if let Some(existing) = self.breakers.get(key.name()) {
            return existing.value().clone();
        }
        self.breakers
            .entry(key.name().to_string())
            .or_insert_with(|| {
                tracing::info!(
                    command = %key.name(),
                    group = %key.group(),
                    "Creating circuit breaker"
                );
                Arc::new(CommandBreaker::new(key.clone(), config))
            })
            .value()
            .clone()
    }

    /// Get or create using the registry's configured defaults and overrides.
    pub fn get_or_default(&self, key: &CommandKey) -> BreakerHandle {
        if let Some(existing) = self.breakers.get(key.name()) {
            return existing.value().clone();
        }
        let settings = self.settings.load_full();
        let breaker = self.get(key, settings.breaker_config(key.name()));
        let current = self.settings.load();
        if !Arc::ptr_eq(&settings, &*current) {
            // A snapshot landed mid-creation and may have missed this breaker.
            let patch = BreakerConfigPatch::from(&current.breaker_config(key.name()));
            if let Err(e) = breaker.update_config(&patch) {
                tracing::error!(error = %e, "Rejected config snapshot for breaker");
            }
        }
        breaker
    }

    /// Look up an existing breaker without creating one.
    pub fn lookup(&self, command: &str) -> Option<BreakerHandle> {
        self.breakers.get(command).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Merge a partial config into a live breaker. Returns the changed fields.
    pub fn update_config(
        &self,
        command: &str,
        patch: &BreakerConfigPatch,
    ) -> Result<Vec<&'static str>, RegistryError> {
        let breaker = self
            .lookup(command)
            .ok_or_else(|| RegistryError::UnknownCommand(command.to_string()))?;
        breaker.update_config(patch)
    }

    /// Force a breaker to CLOSED and clear its window.
    pub fn reset(&self, command: &str) -> Result<(), RegistryError> {
        let breaker = self
            .lookup(command)
            .ok_or_else(|| RegistryError::UnknownCommand(command.to_string()))?;
        breaker.reset();
        Ok(())
    }

    /// Adopt a new configuration snapshot.
    ///
    /// Future breakers are created from it; existing breakers receive their
    /// effective config as a patch. Returns `(command, changed fields)` for
    /// every breaker that changed.
    pub fn apply_snapshot(&self, snapshot: EngineConfig) -> Vec<(String, Vec<&'static str>)> {
        let mut applied = Vec::new();
        let snapshot = Arc::new(snapshot);
        self.settings.store(snapshot.clone());
        for breaker in self.handles() {
            let target = snapshot.breaker_config(breaker.key().name());
            let patch = BreakerConfigPatch::from(&target);
            match breaker.update_config(&patch) {
                Ok(changed) if !changed.is_empty() => {
                    applied.push((breaker.key().name().to_string(), changed));
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Rejected config snapshot for breaker"),
            }
        }
        applied
    }

    /// Status of every breaker, ordered by command key.
    pub fn statuses(&self) -> Vec<BreakerStatus> {
        self.handles().iter().map(|b| b.status()).collect()
    }

    /// Metrics of every breaker, ordered by command key.
    pub fn all_metrics(&self) -> Vec<BreakerMetrics> {
        self.handles().iter().map(|b| b.metrics()).collect()
    }

    fn handles(&self) -> Vec<BreakerHandle> {
        let mut handles: Vec<BreakerHandle> =
            self.breakers.iter().map(|entry| entry.value().clone()).collect();
        handles.sort_by(|a, b| a.key().name().cmp(b.key().name()));
        handles
    }
}

impl From<&BreakerConfig> for BreakerConfigPatch {
    fn from(config: &BreakerConfig) -> Self {
        Self {
            request_volume_threshold: Some(config.request_volume_threshold),
            error_threshold_percentage: Some(config.error_threshold_percentage),
            sleep_window_ms: Some(config.sleep_window_ms),
            timeout_ms: Some(config.timeout_ms),
            timeout_enabled: Some(config.timeout_enabled),
            isolation_limit: Some(config.isolation_limit),
            force_open: Some(config.force_open),
            force_closed: Some(config.force_closed),
            fallback_enabled: Some(config.fallback_enabled),
        }
    }
}
