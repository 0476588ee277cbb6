//! Metrics collection and exposition.
//!
//! # Metrics
//! - `breaker_calls_total` (counter): calls by command, outcome
//! - `breaker_call_duration_seconds` (histogram): latency of executed calls
//! - `breaker_fallbacks_total` (counter): fallback dispatches by command, result
//! - `breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `breaker_transitions_total` (counter): state changes by command, target state
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Prometheus exposition is opt-in via `init_metrics`

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::window::OutcomeKind;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one call outcome.
pub fn record_call(command: &str, outcome: OutcomeKind, latency: Duration) {
    counter!(
        "breaker_calls_total",
        "command" => command.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);

    if outcome != OutcomeKind::ShortCircuited {
        histogram!("breaker_call_duration_seconds", "command" => command.to_string())
            .record(latency.as_secs_f64());
    }
}

/// Record a fallback dispatch (`success`, `failure`, `missing`, `disabled`).
pub fn record_fallback(command: &str, result: &'static str) {
    counter!(
        "breaker_fallbacks_total",
        "command" => command.to_string(),
        "result" => result
    )
    .increment(1);
}

/// Set the current circuit state gauge.
pub fn record_circuit_state(command: &str, state: CircuitState) {
    gauge!("breaker_state", "command" => command.to_string()).set(state as u8 as f64);
}

/// Record a state transition and update the state gauge.
pub fn record_transition(command: &str, to: CircuitState) {
    counter!(
        "breaker_transitions_total",
        "command" => command.to_string(),
        "to" => to.as_str()
    )
    .increment(1);
    record_circuit_state(command, to);
}
