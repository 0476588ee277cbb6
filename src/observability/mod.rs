//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! executor / circuit breaker / fallback produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every event carries the command key as a structured field
//! - State transitions log at WARN, per-call detail at DEBUG

pub mod logging;
pub mod metrics;
