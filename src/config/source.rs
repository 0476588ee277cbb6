//! Pluggable configuration sources and the polling reloader.
//!
//! # Responsibilities
//! - Abstract "where the current config comes from" behind [`ConfigSource`]
//! - Periodically fetch a snapshot and hand it to the breaker registry
//!
//! # Design Decisions
//! - A source that fails to produce a valid snapshot is logged and skipped;
//!   the last good config stays in force
//! - Identical snapshots are not re-applied

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::EngineConfig;
use crate::resilience::registry::BreakerRegistry;

/// Anything that can produce a full engine configuration on demand.
pub trait ConfigSource: Send + Sync {
    /// Fetch the current configuration.
    fn snapshot(&self) -> Result<EngineConfig, ConfigError>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// Reads a TOML file on every snapshot.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ConfigSource for FileConfigSource {
    fn snapshot(&self) -> Result<EngineConfig, ConfigError> {
        load_config(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A fixed in-memory snapshot that can be replaced at runtime.
#[derive(Debug, Default)]
pub struct StaticConfigSource {
    current: Mutex<EngineConfig>,
}

impl StaticConfigSource {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            current: Mutex::new(config),
        }
    }

    pub fn set(&self, config: EngineConfig) {
        *self.current.lock().expect("config source mutex poisoned") = config;
    }
}

impl ConfigSource for StaticConfigSource {
    fn snapshot(&self) -> Result<EngineConfig, ConfigError> {
        Ok(self.current.lock().expect("config source mutex poisoned").clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

/// Polls a [`ConfigSource`] and applies changed snapshots to a registry.
pub struct ConfigPoller {
    source: Arc<dyn ConfigSource>,
    registry: Arc<BreakerRegistry>,
    interval: Duration,
    last_applied: Option<EngineConfig>,
}

impl ConfigPoller {
    pub fn new(
        source: Arc<dyn ConfigSource>,
        registry: Arc<BreakerRegistry>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            registry,
            interval,
            last_applied: None,
        }
    }

    /// Treat `config` as already applied, so an unchanged first poll is a no-op.
    pub fn with_current(mut self, config: EngineConfig) -> Self {
        self.last_applied = Some(config);
        self
    }

    /// Fetch once and apply if changed. Returns whether a snapshot was applied.
    pub fn poll_once(&mut self) -> bool {
        let snapshot = match self.source.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(
                    source = %self.source.describe(),
                    error = %e,
                    "Config poll failed, keeping current config"
                );
                return false;
            }
        };

        if self.last_applied.as_ref() == Some(&snapshot) {
            return false;
        }

        let applied = self.registry.apply_snapshot(snapshot.clone());
        tracing::info!(
            source = %self.source.describe(),
            breakers_changed = applied.len(),
            "Applied polled config snapshot"
        );
        self.last_applied = Some(snapshot);
        true
    }

    /// Poll until shutdown is signalled.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            source = %self.source.describe(),
            interval_ms = self.interval.as_millis() as u64,
            "Config poller starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Config poller received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
