//! Resilience subsystem: breakers, bulkheads and protected execution.
//!
//! # Data Flow
//! ```text
//! Command::execute()
//!     → executor.rs (admission, isolation, deadline)
//!     → circuit_breaker.rs (CLOSED / OPEN / HALF_OPEN, trip evaluation)
//!     → window.rs (rolling outcome counts)
//!     → fallback.rs (substitute value or typed failure)
//! registry.rs owns one breaker per command key.
//! ```
//!
//! # Design Decisions
//! - Every state transition is driven by an admission check or a recorded
//!   outcome; there is no background timer
//! - Config is read from a live snapshot on each evaluation
//! - Nothing here retries a failed call

pub mod bulkhead;
pub mod circuit_breaker;
pub mod error;
pub mod executor;
pub mod fallback;
pub mod registry;
pub mod window;

pub use circuit_breaker::CircuitState;
pub use error::{BoxError, CommandError, FailureCause, RejectReason};
pub use executor::{
    operation_fn, Command, CommandBuilder, Execution, GuardedCommand, ProtectedExecutor,
    ResponseSource,
};
pub use fallback::{fallback_fn, FallbackDispatcher, FallbackFn};
pub use registry::{BreakerHandle, BreakerMetrics, BreakerRegistry, BreakerStatus, CommandKey};
pub use window::{MetricsWindow, Outcome, OutcomeKind};
