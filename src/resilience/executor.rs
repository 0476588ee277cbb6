//! Protected execution of a wrapped operation.
//!
//! # Data Flow
//! ```text
//! execute()
//!     → circuit admission (allow_request)      denied → SHORT_CIRCUITED → fallback
//!     → bulkhead permit (non-blocking)         full   → SHORT_CIRCUITED → fallback
//!     → operation spawned on its own task
//!     → race completion against timeout_ms     late   → TIMEOUT → fallback
//!     → SUCCESS → value | FAILURE → fallback
//! ```
//!
//! # Design Decisions
//! - Timeouts abandon the operation rather than cancel it. The spawned task
//!   keeps running, keeps its bulkhead permit, and records its own outcome
//!   into the window when it eventually finishes
//! - Dropping the caller's future mid-wait does not lose the call: the task
//!   records the outcome with the caller's admission, so a half-open trial
//!   still resolves the circuit
//! - A panic in the operation is caught inside its task and reported as a failure
//! - Nothing is retried here; retries belong to the caller

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::schema::BreakerConfig;
use crate::resilience::circuit_breaker::Admission;
use crate::resilience::error::{BoxError, CommandError, FailureCause, RejectReason};
use crate::resilience::fallback::{FallbackDispatcher, FallbackFn};
use crate::resilience::registry::{BreakerHandle, BreakerRegistry, CommandKey};
use crate::resilience::window::{Outcome, OutcomeKind};

/// Where a successful response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// The wrapped operation.
    Primary,
    /// The registered fallback, after the given kind of failure.
    Fallback,
}

/// A value together with how it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution<T> {
    pub value: T,
    pub source: ResponseSource,
}

/// Boxed operation factory used by [`GuardedCommand`].
pub type OperationFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, BoxError>> + Send + Sync>;

/// Box an async closure as an [`OperationFn`].
pub fn operation_fn<T, F, Fut, E>(f: F) -> OperationFn<T>
where
    T: 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxError>,
{
    Arc::new(move || f().map(|r| r.map_err(Into::<BoxError>::into)).boxed())
}

/// Run `operation` under the breaker, bulkhead and deadline of `breaker`.
pub async fn run_protected<T, F, Fut, E>(
    breaker: &BreakerHandle,
    fallback: &FallbackDispatcher<T>,
    operation: F,
) -> Result<Execution<T>, CommandError>
where
    T: Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    let config = breaker.config();
    let command = breaker.key().name();

    let admission = breaker.allow_request();
    if !admission.is_admitted() {
        tracing::debug!(command = %command, "Circuit open, short-circuiting call");
        breaker.record(Outcome::short_circuited(), admission);
        return with_fallback(
            fallback,
            FailureCause::ShortCircuited(RejectReason::CircuitOpen),
            &config,
        )
        .await;
    }

    let Some(permit) = breaker
        .bulkhead()
        .try_acquire(config.isolation_limit as usize)
    else {
        tracing::debug!(
            command = %command,
            limit = config.isolation_limit,
            "Isolation limit reached, rejecting call"
        );
        breaker.abort_trial(admission);
        breaker.record(Outcome::short_circuited(), Admission::Rejected);
        return with_fallback(
            fallback,
            FailureCause::ShortCircuited(RejectReason::BulkheadFull),
            &config,
        )
        .await;
    };

    let started = Instant::now();
    let (tx, mut rx) = oneshot::channel::<Result<T, BoxError>>();
    let timed_out = Arc::new(AtomicBool::new(false));
    let background = breaker.clone();
    let abandoned = timed_out.clone();
    let work = operation();
    tokio::spawn(async move {
        let result = match AssertUnwindSafe(work).catch_unwind().await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(BoxError::from("operation panicked")),
        };
        drop(permit);
        if let Err(result) = tx.send(result) {
            let outcome = Outcome::new(kind_of(&result), started.elapsed());
            if abandoned.load(Ordering::SeqCst) {
                // The caller already recorded TIMEOUT; the late outcome still counts.
                background.record_abandoned(outcome);
            } else {
                // The caller was dropped before anything was recorded for this call.
                tracing::debug!(
                    command = %background.key().name(),
                    outcome = ?outcome.kind,
                    "Caller went away, recording outcome on its behalf"
                );
                background.record(outcome, admission);
            }
        }
    });

    let received = if config.timeout_enabled {
        match tokio::time::timeout(config.timeout(), &mut rx).await {
            Ok(received) => received,
            Err(_) => {
                tracing::debug!(
                    command = %command,
                    timeout_ms = config.timeout_ms,
                    "Call timed out, abandoning operation"
                );
                timed_out.store(true, Ordering::SeqCst);
                breaker.record(
                    Outcome::new(OutcomeKind::Timeout, started.elapsed()),
                    admission,
                );
                rx.close();
                // Completed between the deadline firing and the channel closing.
                if let Ok(result) = rx.try_recv() {
                    breaker.record_abandoned(Outcome::new(kind_of(&result), started.elapsed()));
                }
                return with_fallback(fallback, FailureCause::Timeout(config.timeout()), &config)
                    .await;
            }
        }
    } else {
        (&mut rx).await
    };

    let latency = started.elapsed();
    match received {
        Ok(Ok(value)) => {
            breaker.record(Outcome::new(OutcomeKind::Success, latency), admission);
            Ok(Execution {
                value,
                source: ResponseSource::Primary,
            })
        }
        Ok(Err(e)) => {
            tracing::debug!(command = %command, error = %e, "Call failed");
            breaker.record(Outcome::new(OutcomeKind::Failure, latency), admission);
            with_fallback(fallback, FailureCause::operation(e), &config).await
        }
        Err(_) => {
            tracing::error!(command = %command, "Operation task ended without a result");
            breaker.record(Outcome::new(OutcomeKind::Failure, latency), admission);
            with_fallback(
                fallback,
                FailureCause::operation("operation task ended without a result"),
                &config,
            )
            .await
        }
    }
}

async fn with_fallback<T>(
    fallback: &FallbackDispatcher<T>,
    cause: FailureCause,
    config: &BreakerConfig,
) -> Result<Execution<T>, CommandError> {
    fallback
        .dispatch(cause, config.fallback_enabled)
        .await
        .map(|value| Execution {
            value,
            source: ResponseSource::Fallback,
        })
}

fn kind_of<T>(result: &Result<T, BoxError>) -> OutcomeKind {
    match result {
        Ok(_) => OutcomeKind::Success,
        Err(_) => OutcomeKind::Failure,
    }
}

/// Executes ad-hoc operations against breakers held in a registry.
#[derive(Debug, Clone)]
pub struct ProtectedExecutor {
    registry: Arc<BreakerRegistry>,
}

impl ProtectedExecutor {
    pub fn new(registry: Arc<BreakerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<BreakerRegistry> {
        &self.registry
    }

    /// Run `operation` protected by the breaker for `command`.
    ///
    /// `config` is used only if this call creates the breaker.
    pub async fn execute<T, F, Fut, E>(
        &self,
        command: &str,
        group: &str,
        operation: F,
        fallback: Option<FallbackFn<T>>,
        config: BreakerConfig,
    ) -> Result<T, CommandError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let breaker = self.registry.get(&CommandKey::new(command, group), config);
        let dispatcher = FallbackDispatcher::new(command, fallback);
        run_protected(&breaker, &dispatcher, operation)
            .await
            .map(|execution| execution.value)
    }
}

/// A command composed once (key, breaker, fallback) and executed many times.
pub struct Command<T> {
    breaker: BreakerHandle,
    fallback: FallbackDispatcher<T>,
}

impl<T> Clone for Command<T> {
    fn clone(&self) -> Self {
        Self {
            breaker: self.breaker.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

impl<T: Send + 'static> Command<T> {
    pub fn builder(name: impl Into<String>, group: impl Into<String>) -> CommandBuilder<T> {
        CommandBuilder {
            key: CommandKey::new(name, group),
            config: None,
            fallback: None,
        }
    }

    pub fn breaker(&self) -> &BreakerHandle {
        &self.breaker
    }

    pub fn name(&self) -> &str {
        self.breaker.key().name()
    }

    /// Execute `operation`, returning its value or the fallback's.
    pub async fn execute<F, Fut, E>(&self, operation: F) -> Result<T, CommandError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.execute_traced(operation).await.map(|e| e.value)
    }

    /// Like [`Command::execute`], but reports whether the fallback answered.
    pub async fn execute_traced<F, Fut, E>(
        &self,
        operation: F,
    ) -> Result<Execution<T>, CommandError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        run_protected(&self.breaker, &self.fallback, operation).await
    }

    /// Bind the operation, producing a guarded callable.
    pub fn wrap(self, operation: OperationFn<T>) -> GuardedCommand<T> {
        GuardedCommand {
            command: self,
            operation,
        }
    }
}

/// Builder for [`Command`].
pub struct CommandBuilder<T> {
    key: CommandKey,
    config: Option<BreakerConfig>,
    fallback: Option<FallbackFn<T>>,
}

impl<T: Send + 'static> CommandBuilder<T> {
    /// Config used if this command creates its breaker. Defaults to the
    /// registry's configured defaults and per-command overrides.
    pub fn config(mut self, config: BreakerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn fallback(mut self, fallback: FallbackFn<T>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn build(self, registry: &BreakerRegistry) -> Command<T> {
        let breaker = match self.config {
            Some(config) => registry.get(&self.key, config),
            None => registry.get_or_default(&self.key),
        };
        Command {
            fallback: FallbackDispatcher::new(self.key.name(), self.fallback),
            breaker,
        }
    }
}

/// A command with its operation bound: call it like a function.
pub struct GuardedCommand<T> {
    command: Command<T>,
    operation: OperationFn<T>,
}

impl<T> Clone for GuardedCommand<T> {
    fn clone(&self) -> Self {
        Self {
            command: self.command.clone(),
            operation: self.operation.clone(),
        }
    }
}

impl<T: Send + 'static> GuardedCommand<T> {
    pub fn command(&self) -> &Command<T> {
        &self.command
    }

    pub async fn call(&self) -> Result<T, CommandError> {
        self.call_traced().await.map(|e| e.value)
    }

    pub async fn call_traced(&self) -> Result<Execution<T>, CommandError> {
        let operation = self.operation.clone();
        self.command.execute_traced(move || operation()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::resilience::fallback::fallback_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config() -> BreakerConfig {
        BreakerConfig {
            request_volume_threshold: 2,
            error_threshold_percentage: 50,
            sleep_window_ms: 2000,
            timeout_ms: 500,
            ..BreakerConfig::default()
        }
    }

    fn command(registry: &BreakerRegistry, with_fallback: bool) -> Command<String> {
        let builder = Command::builder("cmd", "group").config(config());
        let builder = if with_fallback {
            builder.fallback(fallback_fn(|cause: FailureCause| async move {
                Ok::<_, BoxError>(format!("fallback:{}", cause.kind()))
            }))
        } else {
            builder
        };
        builder.build(registry)
    }

    #[tokio::test]
    async fn test_success_returns_primary_value() {
        let registry = BreakerRegistry::default();
        let cmd = command(&registry, true);
        let out = cmd
            .execute_traced(|| async { Ok::<_, BoxError>("ok".to_string()) })
            .await
            .unwrap();
        assert_eq!(out.value, "ok");
        assert_eq!(out.source, ResponseSource::Primary);
        assert_eq!(cmd.breaker().metrics().success_count, 1);
    }

    #[tokio::test]
    async fn test_failure_without_fallback_surfaces_operation_failure() {
        let registry = BreakerRegistry::default();
        let cmd = command(&registry, false);
        let err = cmd
            .execute(|| async { Err::<String, _>("backend down") })
            .await
            .unwrap_err();
        match err {
            CommandError::OperationFailure { source, .. } => {
                assert_eq!(source.to_string(), "backend down")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_panicking_operation_is_a_failure() {
        let registry = BreakerRegistry::default();
        let cmd = command(&registry, true);
        let out = cmd
            .execute_traced(|| async {
                if true {
                    panic!("boom");
                }
                Ok::<String, BoxError>("unreachable".into())
            })
            .await
            .unwrap();
        assert_eq!(out.value, "fallback:failure");
        assert_eq!(cmd.breaker().metrics().failure_count, 1);
    }

    #[tokio::test]
    async fn test_open_circuit_never_runs_operation() {
        let registry = BreakerRegistry::default();
        let cmd = command(&registry, true);
        for _ in 0..2 {
            cmd.execute(|| async { Err::<String, _>("fail") }).await.unwrap();
        }
        assert_eq!(cmd.breaker().state(), CircuitState::Open);

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let out = cmd
            .execute(move || async move {
                ran2.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>("ok".to_string())
            })
            .await
            .unwrap();
        assert_eq!(out, "fallback:short_circuited");
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_fallback_at_deadline() {
        let registry = BreakerRegistry::default();
        let cmd = command(&registry, true);
        let start = Instant::now();
        let out = cmd
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(3000)).await;
                Ok::<_, BoxError>("slow".to_string())
            })
            .await
            .unwrap();
        assert_eq!(out, "fallback:timeout");
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(500) && waited < Duration::from_millis(600));
        assert_eq!(cmd.breaker().metrics().timeout_count, 1);
        assert_eq!(cmd.breaker().bulkhead().active(), 1);

        // The abandoned operation finishes later and is still counted.
        tokio::time::sleep(Duration::from_millis(3000)).await;
        tokio::task::yield_now().await;
        let metrics = cmd.breaker().metrics();
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.in_flight, 0);
    }

    #[tokio::test]
    async fn test_bulkhead_rejects_beyond_isolation_limit() {
        let registry = BreakerRegistry::default();
        let cmd: Command<String> = Command::builder("bulk", "group")
            .config(BreakerConfig {
                isolation_limit: 1,
                ..BreakerConfig::default()
            })
            .build(&registry);

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let first = {
            let cmd = cmd.clone();
            tokio::spawn(async move {
                cmd.execute(move || async move {
                    let _ = release_rx.await;
                    Ok::<_, BoxError>("first".to_string())
                })
                .await
            })
        };
        while cmd.breaker().bulkhead().active() == 0 {
            tokio::task::yield_now().await;
        }

        let err = cmd
            .execute(|| async { Ok::<_, BoxError>("second".to_string()) })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::ShortCircuitFailure {
                reason: RejectReason::BulkheadFull,
                ..
            }
        ));

        release_tx.send(()).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), "first");
    }

    #[tokio::test]
    async fn test_executor_creates_breaker_on_first_call() {
        let registry = Arc::new(BreakerRegistry::default());
        let executor = ProtectedExecutor::new(registry.clone());
        let value = executor
            .execute(
                "adhoc",
                "AdhocGroup",
                || async { Ok::<_, BoxError>(7u32) },
                None,
                BreakerConfig::default(),
            )
            .await
            .unwrap();
        assert_eq!(value, 7);
        let breaker = registry.lookup("adhoc").unwrap();
        assert_eq!(breaker.key().group(), "AdhocGroup");
    }

    #[tokio::test]
    async fn test_guarded_command_calls_bound_operation() {
        let registry = BreakerRegistry::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let guarded = command(&registry, true).wrap(operation_fn(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>("bound".to_string())
            }
        }));

        assert_eq!(guarded.call().await.unwrap(), "bound");
        assert_eq!(guarded.call().await.unwrap(), "bound");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
