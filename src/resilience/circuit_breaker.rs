//! Circuit breaker state machine for one command key.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: dependency assumed down, requests fail fast
//! - Half-Open: a single trial request is probing the dependency
//!
//! # State Transitions
//! ```text
//! Closed → Open: volume >= request_volume_threshold
//!                AND error rate >= error_threshold_percentage
//! Open → Half-Open: allow_request() after the sleep window (admits the trial)
//! Half-Open → Closed: trial succeeds (rolling window is cleared)
//! Half-Open → Open: trial fails or times out (new sleep window)
//! ```
//!
//! # Design Decisions
//! - `allow_request` is a check-and-transition under one lock, never a pure read
//! - `peek_allow` is the pure read used by status queries
//! - The sleep-window deadline is fixed when the circuit opens, so a config
//!   change never shortens or extends an open period already in progress
//! - Trials carry a generation number; a trial that outlives a manual reset
//!   cannot drive a transition

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::BreakerConfig;
use crate::observability::metrics;
use crate::resilience::window::{MetricsWindow, OutcomeKind};

/// Circuit state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Decision returned by [`CircuitBreaker::allow_request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Normal admission while closed (or forced closed).
    Permitted,
    /// Admitted as the half-open trial with the given generation.
    Trial(u64),
    /// Denied; the caller must short-circuit.
    Rejected,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Rejected)
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    opened_at: Option<Instant>,
    open_until: Option<Instant>,
    trial: Option<u64>,
    generation: u64,
}

/// CLOSED / OPEN / HALF_OPEN state machine driven by a [`MetricsWindow`].
#[derive(Debug)]
pub struct CircuitBreaker {
    command: String,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed circuit for `command`.
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        metrics::record_circuit_state(&command, CircuitState::Closed);
        Self {
            command,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                opened_at: None,
                open_until: None,
                trial: None,
                generation: 0,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("circuit mutex poisoned").state
    }

    /// When the circuit last opened, if it is not closed.
    pub fn opened_at(&self) -> Option<Instant> {
        self.inner.lock().expect("circuit mutex poisoned").opened_at
    }

    /// Admission check; may advance OPEN to HALF_OPEN.
    pub fn allow_request(&self, config: &BreakerConfig) -> Admission {
        self.allow_request_at(config, Instant::now())
    }

    pub(crate) fn allow_request_at(&self, config: &BreakerConfig, now: Instant) -> Admission {
        if config.force_open {
            return Admission::Rejected;
        }
        if config.force_closed {
            return Admission::Permitted;
        }

        let mut inner = self.inner.lock().expect("circuit mutex poisoned");
        match inner.state {
            CircuitState::Closed => Admission::Permitted,
            CircuitState::HalfOpen => Admission::Rejected,
            CircuitState::Open => {
                let ready = inner.open_until.map_or(true, |until| now >= until);
                if !ready {
                    return Admission::Rejected;
                }
                inner.generation += 1;
                let generation = inner.generation;
                inner.trial = Some(generation);
                self.transition(&mut inner, CircuitState::HalfOpen);
                tracing::info!(command = %self.command, "Admitting half-open trial request");
                Admission::Trial(generation)
            }
        }
    }

    /// What `allow_request` would answer right now, without mutating anything.
    pub fn peek_allow(&self, config: &BreakerConfig) -> bool {
        self.peek_allow_at(config, Instant::now())
    }

    pub(crate) fn peek_allow_at(&self, config: &BreakerConfig, now: Instant) -> bool {
        if config.force_open {
            return false;
        }
        if config.force_closed {
            return true;
        }
        let inner = self.inner.lock().expect("circuit mutex poisoned");
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => inner.open_until.map_or(true, |until| now >= until),
        }
    }

    /// Record a call outcome and evaluate the next state.
    ///
    /// `admission` is what `allow_request` returned for this call; only the
    /// outstanding trial can move the circuit out of HALF_OPEN.
    pub fn on_outcome(
        &self,
        kind: OutcomeKind,
        admission: Admission,
        window: &MetricsWindow,
        config: &BreakerConfig,
    ) {
        self.on_outcome_at(kind, admission, window, config, Instant::now());
    }

    pub(crate) fn on_outcome_at(
        &self,
        kind: OutcomeKind,
        admission: Admission,
        window: &MetricsWindow,
        config: &BreakerConfig,
        now: Instant,
    ) {
        let mut inner = self.inner.lock().expect("circuit mutex poisoned");
        window.record_at(kind, now);

        if let Admission::Trial(generation) = admission {
            if inner.state == CircuitState::HalfOpen && inner.trial == Some(generation) {
                inner.trial = None;
                if kind == OutcomeKind::Success {
                    inner.opened_at = None;
                    inner.open_until = None;
                    window.clear();
                    self.transition(&mut inner, CircuitState::Closed);
                } else {
                    self.open(&mut inner, config, now);
                }
                return;
            }
        }

        if inner.state != CircuitState::Closed || config.force_closed {
            return;
        }

        let counts = window.counts_at(now);
        if counts.volume() >= u64::from(config.request_volume_threshold)
            && counts.error_rate() >= f64::from(config.error_threshold_percentage)
        {
            tracing::warn!(
                command = %self.command,
                volume = counts.volume(),
                error_rate = counts.error_rate(),
                threshold = config.error_threshold_percentage,
                "Error threshold exceeded, tripping circuit"
            );
            self.open(&mut inner, config, now);
        }
    }

    /// Give back a trial that was admitted but never executed.
    ///
    /// The circuit returns to OPEN with its previous deadline, so the next
    /// request may become the trial immediately.
    pub fn abort_trial(&self, generation: u64) {
        let mut inner = self.inner.lock().expect("circuit mutex poisoned");
        if inner.state == CircuitState::HalfOpen && inner.trial == Some(generation) {
            inner.trial = None;
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    /// Force CLOSED and clear the window. Manual override, not a natural transition.
    pub fn reset(&self, window: &MetricsWindow) {
        let mut inner = self.inner.lock().expect("circuit mutex poisoned");
        inner.trial = None;
        inner.opened_at = None;
        inner.open_until = None;
        window.clear();
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
        tracing::info!(command = %self.command, "Circuit manually reset");
    }

    fn open(&self, inner: &mut Inner, config: &BreakerConfig, now: Instant) {
        inner.opened_at = Some(now);
        inner.open_until = Some(now + Duration::from_millis(config.sleep_window_ms));
        self.transition(inner, CircuitState::Open);
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        if from != to {
            tracing::warn!(
                command = %self.command,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit state changed"
            );
            metrics::record_transition(&self.command, to);
        }
    }
}
