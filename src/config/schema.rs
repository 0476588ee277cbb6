//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the breaker engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Breaker settings applied to every command key.
    pub defaults: BreakerConfig,

    /// Per-command overrides, merged over `defaults`.
    pub commands: BTreeMap<String, BreakerConfigPatch>,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Hot reload settings.
    pub reload: ReloadConfig,
}

impl EngineConfig {
    /// Effective breaker config for a command key.
    pub fn breaker_config(&self, command: &str) -> BreakerConfig {
        let mut config = self.defaults.clone();
        if let Some(patch) = self.commands.get(command) {
            patch.apply(&mut config);
        }
        config
    }
}

/// Tunable thresholds for one command key.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    /// Minimum calls in the rolling window before the circuit may trip.
    pub request_volume_threshold: u32,

    /// Error percentage (0-100) at or above which the circuit trips.
    pub error_threshold_percentage: u32,

    /// How long the circuit stays open before admitting a trial.
    pub sleep_window_ms: u64,

    /// Deadline for a single execution.
    pub timeout_ms: u64,

    /// Enforce `timeout_ms`.
    pub timeout_enabled: bool,

    /// Maximum concurrent executions (bulkhead).
    pub isolation_limit: u32,

    /// Total length of the rolling statistics window.
    pub rolling_window_ms: u64,

    /// Number of buckets the rolling window is split into.
    pub rolling_window_buckets: u32,

    /// Reject every call regardless of health.
    pub force_open: bool,

    /// Admit every call regardless of health (metrics are still recorded).
    pub force_closed: bool,

    /// Invoke the registered fallback on failure.
    pub fallback_enabled: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            request_volume_threshold: 20,
            error_threshold_percentage: 50,
            sleep_window_ms: 5000,
            timeout_ms: 1000,
            timeout_enabled: true,
            isolation_limit: 10,
            rolling_window_ms: 10_000,
            rolling_window_buckets: 10,
            force_open: false,
            force_closed: false,
            fallback_enabled: true,
        }
    }
}

impl BreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sleep_window(&self) -> Duration {
        Duration::from_millis(self.sleep_window_ms)
    }

    pub fn rolling_window(&self) -> Duration {
        Duration::from_millis(self.rolling_window_ms)
    }
}

/// Partial breaker config: overrides in the config file and dynamic updates.
///
/// Rolling-window geometry is fixed when a breaker is created and cannot be patched.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_volume_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_threshold_percentage: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleep_window_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isolation_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_open: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_closed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_enabled: Option<bool>,
}

impl BreakerConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge the provided fields into `config`.
    ///
    /// Returns the names of the fields whose value actually changed.
    pub fn apply(&self, config: &mut BreakerConfig) -> Vec<&'static str> {
        let mut changed = Vec::new();

        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(value) = self.$field {
                        if config.$field != value {
                            config.$field = value;
                            changed.push(stringify!($field));
                        }
                    }
                )*
            };
        }

        merge!(
            request_volume_threshold,
            error_threshold_percentage,
            sleep_window_ms,
            timeout_ms,
            timeout_enabled,
            isolation_limit,
            force_open,
            force_closed,
            fallback_enabled,
        );

        changed
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// How configuration changes are picked up at runtime.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReloadMode {
    Off,
    /// React to file system events.
    #[default]
    Watch,
    /// Re-read the config source on a fixed interval.
    Poll,
}

/// Hot reload configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReloadConfig {
    pub mode: ReloadMode,

    /// Polling interval in milliseconds (poll mode only).
    pub poll_interval_ms: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            mode: ReloadMode::Watch,
            poll_interval_ms: 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_reports_only_changed_fields() {
        let mut config = BreakerConfig::default();
        let patch = BreakerConfigPatch {
            request_volume_threshold: Some(3),
            error_threshold_percentage: Some(50), // same as default
            timeout_ms: Some(500),
            ..BreakerConfigPatch::default()
        };

        let changed = patch.apply(&mut config);
        assert_eq!(changed, vec!["request_volume_threshold", "timeout_ms"]);
        assert_eq!(config.request_volume_threshold, 3);
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.sleep_window_ms, 5000);

        // Applying the same patch again changes nothing.
        assert!(patch.apply(&mut config).is_empty());
    }

    #[test]
    fn test_command_overrides_merge_over_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [defaults]
            timeout_ms = 2000

            [commands.callSlowApi]
            timeout_ms = 500
            isolation_limit = 2
            "#,
        )
        .unwrap();

        let slow = config.breaker_config("callSlowApi");
        assert_eq!(slow.timeout_ms, 500);
        assert_eq!(slow.isolation_limit, 2);

        let other = config.breaker_config("callNormalApi");
        assert_eq!(other.timeout_ms, 2000);
        assert_eq!(other.isolation_limit, 10);
    }

    #[test]
    fn test_patch_rejects_unknown_fields() {
        let result: Result<BreakerConfigPatch, _> =
            serde_json::from_str(r#"{"rolling_window_ms": 1000}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_reload_mode_parses_lowercase() {
        let config: EngineConfig = toml::from_str(
            r#"
            [reload]
            mode = "poll"
            poll_interval_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.reload.mode, ReloadMode::Poll);
        assert_eq!(config.reload.poll_interval_ms, 250);
    }
}
