//! Load-test harness.
//!
//! Fires a batch of calls at one guarded command and tallies how each was
//! served. Used by the admin API and the CLI to watch a breaker trip and
//! recover under real traffic.

use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::executor::{GuardedCommand, ResponseSource};

/// Largest `count` the admin API accepts for one run.
pub const MAX_LOAD_TEST_COUNT: usize = 10_000;

/// Shape of one load-test run.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoadTest {
    /// Total number of calls.
    pub count: usize,
    /// Maximum calls in flight; 1 runs them sequentially.
    pub concurrency: usize,
}

impl Default for LoadTest {
    fn default() -> Self {
        Self {
            count: 20,
            concurrency: 1,
        }
    }
}

/// Tally of one run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LoadTestReport {
    pub command: String,
    pub total: usize,
    /// Served by the wrapped operation.
    pub success: usize,
    /// Served by the fallback.
    pub fallback: usize,
    /// Surfaced as a typed failure.
    pub failure: usize,
    pub elapsed_ms: u64,
    /// Breaker state once the run finished.
    pub status: CircuitState,
}

#[derive(Default)]
struct Tally {
    success: usize,
    fallback: usize,
    failure: usize,
}

impl LoadTest {
    pub fn new(count: usize, concurrency: usize) -> Self {
        Self { count, concurrency }
    }

    pub async fn run<T: Send + 'static>(&self, command: &GuardedCommand<T>) -> LoadTestReport {
        let name = command.command().name().to_string();
        tracing::info!(
            command = %name,
            count = self.count,
            concurrency = self.concurrency,
            "Starting load test"
        );

        let started = Instant::now();
        let tally = stream::iter(0..self.count)
            .map(|_| command.call_traced())
            .buffer_unordered(self.concurrency.max(1))
            .fold(Tally::default(), |mut tally, result| async move {
                match result {
                    Ok(execution) if execution.source == ResponseSource::Primary => {
                        tally.success += 1
                    }
                    Ok(_) => tally.fallback += 1,
                    Err(_) => tally.failure += 1,
                }
                tally
            })
            .await;
        let elapsed = started.elapsed();

        let report = LoadTestReport {
            command: name,
            total: tally.success + tally.fallback + tally.failure,
            success: tally.success,
            fallback: tally.fallback,
            failure: tally.failure,
            elapsed_ms: duration_ms(elapsed),
            status: command.command().breaker().state(),
        };

        tracing::info!(
            command = %report.command,
            success = report.success,
            fallback = report.fallback,
            failure = report.failure,
            elapsed_ms = report.elapsed_ms,
            "Load test finished"
        );
        report
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
