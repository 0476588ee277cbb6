//! End-to-end breaker behavior through the public API.
//!
//! Time-dependent scenarios run on tokio's paused clock, so sleep windows
//! and deadlines are exact.

use std::sync::Arc;
use std::time::Duration;

use command_breaker::resilience::ResponseSource;
use command_breaker::{
    BreakerConfig, BreakerConfigPatch, BreakerRegistry, CircuitState, CommandError,
};
use tokio::time::{advance, Instant};

mod common;
use common::Backend;

fn config(volume: u32, error_pct: u32, sleep_ms: u64, timeout_ms: u64) -> BreakerConfig {
    BreakerConfig {
        request_volume_threshold: volume,
        error_threshold_percentage: error_pct,
        sleep_window_ms: sleep_ms,
        timeout_ms,
        ..BreakerConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_reset_leaves_clean_closed_breaker() {
    let registry = BreakerRegistry::default();
    let cmd = common::command(&registry, "cmd", config(1, 10, 5000, 1000));
    let backend = Backend::new();

    cmd.execute(backend.fail()).await.unwrap();
    assert_eq!(cmd.breaker().state(), CircuitState::Open);

    registry.reset("cmd").unwrap();
    let metrics = cmd.breaker().metrics();
    assert_eq!(metrics.failure_rate, 0.0);
    assert_eq!(metrics.volume, 0);
    let status = cmd.breaker().status();
    assert_eq!(status.state, CircuitState::Closed);
    assert!(status.allow_request);
}

#[tokio::test(start_paused = true)]
async fn test_three_failures_trip_until_sleep_window_elapses() {
    let registry = BreakerRegistry::default();
    let cmd = common::command(&registry, "cmd", config(3, 50, 5000, 1000));
    let backend = Backend::new();

    cmd.execute(backend.fail()).await.unwrap();
    cmd.execute(backend.fail()).await.unwrap();
    assert_eq!(cmd.breaker().state(), CircuitState::Closed);
    cmd.execute(backend.fail()).await.unwrap();
    assert_eq!(cmd.breaker().state(), CircuitState::Open);
    assert!(!cmd.breaker().status().allow_request);

    advance(Duration::from_millis(4999)).await;
    assert_eq!(
        cmd.execute(backend.succeed()).await.unwrap(),
        "fallback:short_circuited"
    );
    assert_eq!(backend.calls(), 3);

    advance(Duration::from_millis(2)).await;
    assert!(cmd.breaker().status().allow_request);
    assert_eq!(cmd.execute(backend.succeed()).await.unwrap(), "ok");
    assert_eq!(cmd.breaker().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_only_one_half_open_trial_at_a_time() {
    let registry = BreakerRegistry::default();
    let cmd = common::command(&registry, "cmd", config(1, 50, 5000, 60_000));
    let backend = Backend::new();

    cmd.execute(backend.fail()).await.unwrap();
    advance(Duration::from_millis(5001)).await;

    let (release, gate) = tokio::sync::oneshot::channel();
    let trial = {
        let cmd = cmd.clone();
        let op = backend.succeed_when(gate);
        tokio::spawn(async move { cmd.execute_traced(op).await })
    };
    while cmd.breaker().state() != CircuitState::HalfOpen {
        tokio::task::yield_now().await;
    }

    let concurrent = cmd.execute_traced(backend.succeed()).await.unwrap();
    assert_eq!(concurrent.source, ResponseSource::Fallback);
    assert_eq!(concurrent.value, "fallback:short_circuited");

    release.send(()).unwrap();
    let trial = trial.await.unwrap().unwrap();
    assert_eq!(trial.source, ResponseSource::Primary);
    assert_eq!(cmd.breaker().state(), CircuitState::Closed);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_trial_success_starts_a_fresh_window() {
    let registry = BreakerRegistry::default();
    let cmd = common::command(&registry, "cmd", config(2, 50, 1000, 1000));
    let backend = Backend::new();

    cmd.execute(backend.fail()).await.unwrap();
    cmd.execute(backend.fail()).await.unwrap();
    assert_eq!(cmd.breaker().state(), CircuitState::Open);

    advance(Duration::from_millis(1000)).await;
    cmd.execute(backend.succeed()).await.unwrap();
    assert_eq!(cmd.breaker().state(), CircuitState::Closed);
    assert_eq!(cmd.breaker().metrics().volume, 0);

    // A lone failure is below the volume threshold of the fresh window.
    cmd.execute(backend.fail()).await.unwrap();
    assert_eq!(cmd.breaker().state(), CircuitState::Closed);
    assert_eq!(cmd.breaker().metrics().volume, 1);
}

#[tokio::test(start_paused = true)]
async fn test_trial_failure_reopens_with_new_sleep_window() {
    let registry = BreakerRegistry::default();
    let cmd = common::command(&registry, "cmd", config(1, 50, 2000, 1000));
    let backend = Backend::new();

    cmd.execute(backend.fail()).await.unwrap();
    advance(Duration::from_millis(2000)).await;
    assert_eq!(cmd.execute(backend.fail()).await.unwrap(), "fallback:failure");
    assert_eq!(cmd.breaker().state(), CircuitState::Open);

    advance(Duration::from_millis(1999)).await;
    assert!(!cmd.breaker().status().allow_request);
    advance(Duration::from_millis(1)).await;
    assert!(cmd.breaker().status().allow_request);
}

#[tokio::test(start_paused = true)]
async fn test_slow_operation_is_abandoned_at_deadline() {
    let registry = BreakerRegistry::default();
    let cmd = common::command(&registry, "cmd", config(20, 50, 5000, 1000));
    let backend = Backend::new();

    let start = Instant::now();
    let out = cmd
        .execute_traced(backend.succeed_after(Duration::from_millis(3000)))
        .await
        .unwrap();
    let waited = start.elapsed();
    assert_eq!(out.value, "fallback:timeout");
    assert!(waited >= Duration::from_millis(1000) && waited < Duration::from_millis(1100));

    let metrics = cmd.breaker().metrics();
    assert_eq!(metrics.timeout_count, 1);
    assert_eq!(metrics.success_count, 0);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    let metrics = cmd.breaker().metrics();
    assert_eq!(metrics.success_count, 1);
    assert_eq!(metrics.volume, 2);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_trial_caller_still_closes_circuit() {
    let registry = BreakerRegistry::default();
    let cmd = common::command(&registry, "cmd", config(1, 50, 100, 1000));
    let backend = Backend::new();

    cmd.execute(backend.fail()).await.unwrap();
    advance(Duration::from_millis(150)).await;

    let gave_up = tokio::time::timeout(
        Duration::from_millis(10),
        cmd.execute(backend.succeed_after(Duration::from_millis(50))),
    )
    .await;
    assert!(gave_up.is_err());
    assert_eq!(cmd.breaker().state(), CircuitState::HalfOpen);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(cmd.breaker().state(), CircuitState::Closed);
    assert_eq!(cmd.execute(backend.succeed()).await.unwrap(), "ok");
    assert_eq!(backend.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_trial_caller_failure_reopens_circuit() {
    let registry = BreakerRegistry::default();
    let cmd = common::command(&registry, "cmd", config(1, 50, 100, 1000));
    let backend = Backend::new();

    cmd.execute(backend.fail()).await.unwrap();
    advance(Duration::from_millis(150)).await;

    let gave_up = tokio::time::timeout(
        Duration::from_millis(10),
        cmd.execute(backend.fail_after(Duration::from_millis(50))),
    )
    .await;
    assert!(gave_up.is_err());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(cmd.breaker().state(), CircuitState::Open);
    assert!(!cmd.breaker().status().allow_request);

    // A fresh sleep window started when the trial failed.
    advance(Duration::from_millis(100)).await;
    assert!(cmd.breaker().status().allow_request);
    assert_eq!(cmd.execute(backend.succeed()).await.unwrap(), "ok");
    assert_eq!(cmd.breaker().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_caller_releases_permit_and_records_outcome() {
    let registry = BreakerRegistry::default();
    let cmd = common::command(
        &registry,
        "cmd",
        BreakerConfig {
            isolation_limit: 1,
            timeout_enabled: false,
            ..config(20, 50, 5000, 1000)
        },
    );
    let backend = Backend::new();

    let gave_up = tokio::time::timeout(
        Duration::from_millis(10),
        cmd.execute(backend.succeed_after(Duration::from_millis(50))),
    )
    .await;
    assert!(gave_up.is_err());
    assert_eq!(cmd.breaker().bulkhead().active(), 1);
    assert_eq!(
        cmd.execute(backend.succeed()).await.unwrap(),
        "fallback:short_circuited"
    );

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(cmd.breaker().bulkhead().active(), 0);
    let metrics = cmd.breaker().metrics();
    assert_eq!(metrics.success_count, 1);
    assert_eq!(metrics.timeout_count, 0);
    assert_eq!(cmd.breaker().state(), CircuitState::Closed);

    assert_eq!(cmd.execute(backend.succeed()).await.unwrap(), "ok");
    assert_eq!(backend.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_without_fallback_is_typed() {
    let registry = BreakerRegistry::default();
    let cmd = common::bare_command(&registry, "cmd", config(20, 50, 5000, 200));
    let backend = Backend::new();

    let err = cmd
        .execute(backend.succeed_after(Duration::from_millis(500)))
        .await
        .unwrap_err();
    match err {
        CommandError::TimeoutFailure { command, timeout } => {
            assert_eq!(command, "cmd");
            assert_eq!(timeout, Duration::from_millis(200));
        }
        other => panic!("expected timeout, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_status_queries_never_change_state() {
    let registry = BreakerRegistry::default();
    let cmd = common::command(&registry, "cmd", config(1, 50, 1000, 1000));
    cmd.execute(Backend::new().fail()).await.unwrap();
    advance(Duration::from_millis(1500)).await;

    let before = registry.statuses();
    for _ in 0..5 {
        assert_eq!(registry.statuses(), before);
        assert_eq!(registry.all_metrics().len(), 1);
    }
    // Eligible for a trial, but only `execute` may take it.
    assert_eq!(before[0].state, CircuitState::Open);
    assert!(before[0].allow_request);
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_trip_short_circuit_and_recover() {
    let registry = BreakerRegistry::default();
    let cmd = common::command(&registry, "callFailingApi", config(2, 50, 2000, 500));
    let backend = Backend::new();

    assert_eq!(cmd.execute(backend.fail()).await.unwrap(), "fallback:failure");
    assert_eq!(cmd.execute(backend.fail()).await.unwrap(), "fallback:failure");
    assert_eq!(cmd.breaker().state(), CircuitState::Open);

    advance(Duration::from_millis(100)).await;
    let skipped = Backend::new();
    assert_eq!(
        cmd.execute(skipped.succeed()).await.unwrap(),
        "fallback:short_circuited"
    );
    assert_eq!(skipped.calls(), 0);

    advance(Duration::from_millis(2000)).await;
    assert_eq!(cmd.execute(backend.succeed()).await.unwrap(), "ok");
    assert_eq!(cmd.breaker().state(), CircuitState::Closed);
    assert_eq!(cmd.breaker().metrics().volume, 0);
}

#[tokio::test]
async fn test_short_circuit_without_fallback_is_typed() {
    let registry = BreakerRegistry::default();
    let cmd = common::bare_command(&registry, "cmd", config(1, 50, 60_000, 1000));
    let backend = Backend::new();

    assert!(matches!(
        cmd.execute(backend.fail()).await,
        Err(CommandError::OperationFailure { .. })
    ));
    let err = cmd.execute(backend.succeed()).await.unwrap_err();
    assert!(err.is_short_circuit());
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_breakers_are_isolated_per_key() {
    let registry = BreakerRegistry::default();
    let failing = common::command(&registry, "failing", config(1, 50, 60_000, 1000));
    let healthy = common::command(&registry, "healthy", config(1, 50, 60_000, 1000));
    let backend = Backend::new();

    failing.execute(backend.fail()).await.unwrap();
    assert_eq!(failing.breaker().state(), CircuitState::Open);
    assert_eq!(healthy.execute(backend.succeed()).await.unwrap(), "ok");
    assert_eq!(healthy.breaker().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_config_update_applies_to_next_evaluation() {
    let registry = Arc::new(BreakerRegistry::default());
    let cmd = common::command(&registry, "cmd", config(20, 50, 5000, 1000));
    let backend = Backend::new();

    cmd.execute(backend.fail()).await.unwrap();
    cmd.execute(backend.fail()).await.unwrap();
    assert_eq!(cmd.breaker().state(), CircuitState::Closed);

    let changed = registry
        .update_config(
            "cmd",
            &BreakerConfigPatch {
                request_volume_threshold: Some(3),
                ..BreakerConfigPatch::default()
            },
        )
        .unwrap();
    assert_eq!(changed, vec!["request_volume_threshold"]);

    cmd.execute(backend.fail()).await.unwrap();
    assert_eq!(cmd.breaker().state(), CircuitState::Open);

    // A shorter sleep window does not shorten the open period in progress.
    registry
        .update_config(
            "cmd",
            &BreakerConfigPatch {
                sleep_window_ms: Some(100),
                ..BreakerConfigPatch::default()
            },
        )
        .unwrap();
    advance(Duration::from_millis(200)).await;
    assert!(!cmd.breaker().status().allow_request);
}

#[tokio::test]
async fn test_force_open_and_force_closed_override_state() {
    let registry = BreakerRegistry::default();
    let cmd = common::command(&registry, "cmd", config(1, 50, 60_000, 1000));
    let backend = Backend::new();

    registry
        .update_config(
            "cmd",
            &BreakerConfigPatch {
                force_open: Some(true),
                ..BreakerConfigPatch::default()
            },
        )
        .unwrap();
    assert_eq!(
        cmd.execute(backend.succeed()).await.unwrap(),
        "fallback:short_circuited"
    );
    assert_eq!(backend.calls(), 0);

    registry
        .update_config(
            "cmd",
            &BreakerConfigPatch {
                force_open: Some(false),
                force_closed: Some(true),
                ..BreakerConfigPatch::default()
            },
        )
        .unwrap();
    cmd.execute(backend.fail()).await.unwrap();
    cmd.execute(backend.fail()).await.unwrap();
    assert_eq!(cmd.execute(backend.succeed()).await.unwrap(), "ok");
}
