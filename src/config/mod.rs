//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → EngineConfig (defaults + per-command overrides)
//!     → BreakerRegistry (one live snapshot per breaker)
//!
//! On change:
//!     watcher.rs (file events) or source.rs (ConfigPoller on an interval)
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → BreakerRegistry::apply_snapshot
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - An invalid file never replaces the running config

pub mod loader;
pub mod schema;
pub mod source;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, BreakerConfig, BreakerConfigPatch, EngineConfig, LogFormat,
    ObservabilityConfig, ReloadConfig, ReloadMode,
};
pub use source::{ConfigPoller, ConfigSource, FileConfigSource, StaticConfigSource};
pub use validation::ValidationError;
pub use watcher::ConfigWatcher;
