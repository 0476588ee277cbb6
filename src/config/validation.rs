//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (percentages, timeouts, bucket geometry)
//! - Detect conflicting flags (force_open together with force_closed)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EngineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system, and again on every
//!   dynamic update of a single breaker

use thiserror::Error;

use crate::config::schema::{BreakerConfig, EngineConfig, ReloadMode};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{scope}: {message}")]
pub struct ValidationError {
    /// Where the problem is (`defaults`, `commands.<key>`, `admin`, ...).
    pub scope: String,
    pub message: String,
}

impl ValidationError {
    fn new(scope: &str, message: impl Into<String>) -> Self {
        Self {
            scope: scope.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a whole engine configuration.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_breaker("defaults", &config.defaults, &mut errors);
    for command in config.commands.keys() {
        let scope = format!("commands.{}", command);
        check_breaker(&scope, &config.breaker_config(command), &mut errors);
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new(
            "admin",
            "api_key must not be empty when the admin API is enabled",
        ));
    }

    if config.reload.mode == ReloadMode::Poll && config.reload.poll_interval_ms == 0 {
        errors.push(ValidationError::new(
            "reload",
            "poll_interval_ms must be greater than 0",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the effective config of one breaker.
pub fn validate_breaker(scope: &str, config: &BreakerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_breaker(scope, config, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_breaker(scope: &str, config: &BreakerConfig, errors: &mut Vec<ValidationError>) {
    if config.request_volume_threshold == 0 {
        errors.push(ValidationError::new(
            scope,
            "request_volume_threshold must be at least 1",
        ));
    }
    if config.error_threshold_percentage > 100 {
        errors.push(ValidationError::new(
            scope,
            format!(
                "error_threshold_percentage must be within 0..=100, got {}",
                config.error_threshold_percentage
            ),
        ));
    }
    if config.timeout_ms == 0 {
        errors.push(ValidationError::new(scope, "timeout_ms must be greater than 0"));
    }
    if config.isolation_limit == 0 {
        errors.push(ValidationError::new(
            scope,
            "isolation_limit must be greater than 0",
        ));
    }
    if config.rolling_window_buckets == 0 {
        errors.push(ValidationError::new(
            scope,
            "rolling_window_buckets must be greater than 0",
        ));
    } else {
        let buckets = u64::from(config.rolling_window_buckets);
        if config.rolling_window_ms % buckets != 0 {
            errors.push(ValidationError::new(
                scope,
                format!(
                    "rolling_window_ms ({}) must be divisible by rolling_window_buckets ({})",
                    config.rolling_window_ms, buckets
                ),
            ));
        } else if config.rolling_window_ms / buckets == 0 {
            errors.push(ValidationError::new(
                scope,
                "rolling window buckets must be at least 1ms wide",
            ));
        }
    }
    if config.force_open && config.force_closed {
        errors.push(ValidationError::new(
            scope,
            "force_open and force_closed cannot both be set",
        ));
    }
}
