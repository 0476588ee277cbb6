//! Circuit-breaker protected remote-call engine.
//!
//! Wrap calls to a slow or failing dependency in a [`Command`]: outcomes are
//! tracked in a rolling window, the breaker trips when the error rate crosses
//! its threshold, and a registered fallback answers instead of letting the
//! failure cascade.
//!
//! ```no_run
//! # async fn demo() {
//! use command_breaker::{BoxError, BreakerRegistry, Command, FailureCause};
//! use command_breaker::resilience::fallback_fn;
//!
//! let registry = BreakerRegistry::default();
//! let fetch = Command::builder("fetchProfile", "ProfileService")
//!     .fallback(fallback_fn(|_cause: FailureCause| async {
//!         Ok::<_, BoxError>("cached profile".to_string())
//!     }))
//!     .build(&registry);
//!
//! let profile = fetch
//!     .execute(|| async { Ok::<_, BoxError>("fresh profile".to_string()) })
//!     .await;
//! # }
//! ```

pub mod admin;
pub mod config;
pub mod demo;
pub mod lifecycle;
pub mod loadtest;
pub mod observability;
pub mod resilience;

pub use config::schema::{BreakerConfig, BreakerConfigPatch, EngineConfig};
pub use lifecycle::Shutdown;
pub use resilience::{
    BoxError, BreakerRegistry, CircuitState, Command, CommandError, CommandKey, FailureCause,
    ProtectedExecutor,
};
