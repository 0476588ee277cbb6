//! Failure taxonomy for protected calls.
//!
//! A caller of a protected command receives either a value or exactly one
//! [`CommandError`]. The first three variants map one-to-one onto the
//! [`FailureCause`] handed to a fallback; [`CommandError::FallbackFailure`] wraps
//! the original cause together with the fallback's own failure.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by wrapped operations and fallbacks.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared, cloneable error so a cause can be both handed to a fallback and
/// reported to the caller.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Why a call was denied without invoking the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The circuit is open (or a half-open trial is already outstanding).
    CircuitOpen,
    /// The per-command isolation limit is saturated.
    BulkheadFull,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::CircuitOpen => write!(f, "circuit open"),
            RejectReason::BulkheadFull => write!(f, "isolation limit reached"),
        }
    }
}

/// The reason a fallback is being invoked.
#[derive(Debug, Clone, Error)]
pub enum FailureCause {
    /// The call was never attempted.
    #[error("short-circuited: {0}")]
    ShortCircuited(RejectReason),

    /// The deadline elapsed before the operation completed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The operation itself returned an error (or panicked).
    #[error("operation failed: {0}")]
    OperationFailure(SharedError),
}

impl FailureCause {
    /// Wrap an operation error.
    pub fn operation(err: impl Into<BoxError>) -> Self {
        FailureCause::OperationFailure(Arc::from(err.into()))
    }

    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FailureCause::ShortCircuited(_) => "short_circuited",
            FailureCause::Timeout(_) => "timeout",
            FailureCause::OperationFailure(_) => "failure",
        }
    }
}

/// Errors surfaced to the caller of a protected command.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// The wrapped call raised an error and no fallback handled it.
    #[error("command `{command}` failed: {source}")]
    OperationFailure {
        command: String,
        source: SharedError,
    },

    /// The deadline was exceeded and no fallback handled it.
    #[error("command `{command}` timed out after {timeout:?}")]
    TimeoutFailure { command: String, timeout: Duration },

    /// The call was denied and no fallback handled it.
    #[error("command `{command}` short-circuited: {reason}")]
    ShortCircuitFailure {
        command: String,
        reason: RejectReason,
    },

    /// The fallback itself failed.
    #[error("fallback for command `{command}` failed: {fallback} (original cause: {cause})")]
    FallbackFailure {
        command: String,
        cause: FailureCause,
        fallback: SharedError,
    },
}

impl CommandError {
    /// Surface a cause unmodified as the matching typed failure.
    pub fn from_cause(command: &str, cause: FailureCause) -> Self {
        let command = command.to_string();
        match cause {
            FailureCause::ShortCircuited(reason) => {
                CommandError::ShortCircuitFailure { command, reason }
            }
            FailureCause::Timeout(timeout) => CommandError::TimeoutFailure { command, timeout },
            FailureCause::OperationFailure(source) => {
                CommandError::OperationFailure { command, source }
            }
        }
    }

    /// The command key this failure belongs to.
    pub fn command(&self) -> &str {
        match self {
            CommandError::OperationFailure { command, .. }
            | CommandError::TimeoutFailure { command, .. }
            | CommandError::ShortCircuitFailure { command, .. }
            | CommandError::FallbackFailure { command, .. } => command,
        }
    }

    pub fn is_short_circuit(&self) -> bool {
        matches!(self, CommandError::ShortCircuitFailure { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::TimeoutFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cause_keeps_kind() {
        let err = CommandError::from_cause(
            "callSlowApi",
            FailureCause::Timeout(Duration::from_millis(500)),
        );
        assert!(err.is_timeout());
        assert_eq!(err.command(), "callSlowApi");

        let err = CommandError::from_cause(
            "callFailingApi",
            FailureCause::ShortCircuited(RejectReason::CircuitOpen),
        );
        assert!(err.is_short_circuit());
    }

    #[test]
    fn test_fallback_failure_message_mentions_both_causes() {
        let err = CommandError::FallbackFailure {
            command: "callFailingApi".into(),
            cause: FailureCause::operation("backend exploded"),
            fallback: Arc::from(BoxError::from("cache empty")),
        };
        let msg = err.to_string();
        assert!(msg.contains("cache empty"));
        assert!(msg.contains("backend exploded"));
    }
}
