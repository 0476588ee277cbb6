//! Shared utilities for integration tests: scripted operations and fallbacks.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use command_breaker::resilience::fallback_fn;
use command_breaker::resilience::FallbackFn;
use command_breaker::{BoxError, BreakerConfig, BreakerRegistry, Command, FailureCause};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

/// A fallback that answers `fallback:<cause kind>`.
pub fn tagged_fallback() -> FallbackFn<String> {
    fallback_fn(|cause: FailureCause| async move {
        Ok::<_, BoxError>(format!("fallback:{}", cause.kind()))
    })
}

/// Build a command with [`tagged_fallback`].
pub fn command(registry: &BreakerRegistry, name: &str, config: BreakerConfig) -> Command<String> {
    Command::builder(name, "TestGroup")
        .config(config)
        .fallback(tagged_fallback())
        .build(registry)
}

/// Build a command with no fallback, so failures surface as typed errors.
pub fn bare_command(
    registry: &BreakerRegistry,
    name: &str,
    config: BreakerConfig,
) -> Command<String> {
    Command::builder(name, "TestGroup").config(config).build(registry)
}

type Op = BoxFuture<'static, Result<String, BoxError>>;

/// A scripted remote dependency that counts how often it is actually invoked.
#[derive(Clone, Default)]
pub struct Backend {
    calls: Arc<AtomicUsize>,
}

impl Backend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times an operation from this backend started running.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Succeeds with `"ok"` after `latency`.
    pub fn succeed_after(&self, latency: Duration) -> impl FnOnce() -> Op {
        let calls = self.calls.clone();
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                Ok("ok".to_string())
            }
            .boxed()
        }
    }

    pub fn succeed(&self) -> impl FnOnce() -> Op {
        self.succeed_after(Duration::ZERO)
    }

    /// Fails with `"dependency down"` after `latency`.
    pub fn fail_after(&self, latency: Duration) -> impl FnOnce() -> Op {
        let calls = self.calls.clone();
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                Err::<String, BoxError>("dependency down".into())
            }
            .boxed()
        }
    }

    pub fn fail(&self) -> impl FnOnce() -> Op {
        self.fail_after(Duration::ZERO)
    }

    /// Succeeds once `release` fires.
    pub fn succeed_when(&self, release: tokio::sync::oneshot::Receiver<()>) -> impl FnOnce() -> Op {
        let calls = self.calls.clone();
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let _ = release.await;
                Ok("ok".to_string())
            }
            .boxed()
        }
    }
}
