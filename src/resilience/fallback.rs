//! Fallback dispatch.
//!
//! A fallback is registered per command when the command is composed. When
//! the executor denies or fails a call, the dispatcher either invokes that
//! fallback with the cause or, if none is registered (or fallbacks are
//! disabled for the command), surfaces the cause as a typed failure. A failing
//! fallback is not retried and there is no second-level fallback.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::observability::metrics;
use crate::resilience::error::{BoxError, CommandError, FailureCause};

/// A fallback: receives the failure cause and produces a substitute value.
pub type FallbackFn<T> =
    Arc<dyn Fn(FailureCause) -> BoxFuture<'static, Result<T, BoxError>> + Send + Sync>;

/// Box an async closure as a [`FallbackFn`].
pub fn fallback_fn<T, F, Fut, E>(f: F) -> FallbackFn<T>
where
    T: 'static,
    F: Fn(FailureCause) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxError>,
{
    Arc::new(move |cause: FailureCause| {
        f(cause)
            .map(|r| r.map_err(Into::<BoxError>::into))
            .boxed()
    })
}

/// Invokes the registered fallback for one command.
pub struct FallbackDispatcher<T> {
    command: String,
    fallback: Option<FallbackFn<T>>,
}

impl<T> Clone for FallbackDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            command: self.command.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

impl<T> FallbackDispatcher<T> {
    pub fn new(command: impl Into<String>, fallback: Option<FallbackFn<T>>) -> Self {
        Self {
            command: command.into(),
            fallback,
        }
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Resolve `cause` into a substitute value or a typed failure.
    pub async fn dispatch(&self, cause: FailureCause, enabled: bool) -> Result<T, CommandError> {
        let fallback = match &self.fallback {
            Some(f) if enabled => f,
            Some(_) => {
                metrics::record_fallback(&self.command, "disabled");
                return Err(CommandError::from_cause(&self.command, cause));
            }
            None => {
                metrics::record_fallback(&self.command, "missing");
                return Err(CommandError::from_cause(&self.command, cause));
            }
        };

        tracing::debug!(command = %self.command, cause = cause.kind(), "Invoking fallback");
        match fallback(cause.clone()).await {
            Ok(value) => {
                metrics::record_fallback(&self.command, "success");
                Ok(value)
            }
            Err(e) => {
                tracing::error!(
                    command = %self.command,
                    cause = %cause,
                    error = %e,
                    "Fallback failed"
                );
                metrics::record_fallback(&self.command, "failure");
                Err(CommandError::FallbackFailure {
                    command: self.command.clone(),
                    cause,
                    fallback: Arc::from(e),
                })
            }
        }
    }
}
