//! Simulated dependencies served by the `command-breaker` binary.
//!
//! Each command wraps a fake remote call with a distinct failure profile so
//! the breaker's behavior can be observed through the admin API:
//!
//! | Command          | Group          | Behavior                               |
//! |------------------|----------------|----------------------------------------|
//! | `callNormalApi`  | NormalService  | always succeeds                        |
//! | `callFailingApi` | FailingService | always fails after 50-200ms            |
//! | `callSlowApi`    | SlowService    | succeeds after 3s (past the deadline)  |
//! | `callRandomApi`  | RandomService  | 50% success, 100-800ms latency         |

use std::time::Duration;

use rand::Rng;

use crate::resilience::error::{BoxError, FailureCause};
use crate::resilience::executor::{operation_fn, Command, GuardedCommand};
use crate::resilience::fallback::fallback_fn;
use crate::resilience::registry::BreakerRegistry;

pub const NORMAL: &str = "callNormalApi";
pub const FAILING: &str = "callFailingApi";
pub const SLOW: &str = "callSlowApi";
pub const RANDOM: &str = "callRandomApi";

/// How long the slow dependency takes to answer.
pub const SLOW_LATENCY: Duration = Duration::from_millis(3000);

/// The demo commands, registered against one registry.
#[derive(Clone)]
pub struct DemoCommands {
    commands: Vec<GuardedCommand<String>>,
}

impl DemoCommands {
    /// Build every demo command. Their breakers take the registry's
    /// configured defaults and per-command overrides.
    pub fn register(registry: &BreakerRegistry) -> Self {
        let commands = vec![
            guarded(registry, NORMAL, "NormalService", "Fallback: Cached data", || async {
                Ok::<_, BoxError>("Normal API Response: Success".to_string())
            }),
            guarded(
                registry,
                FAILING,
                "FailingService",
                "Fallback: Service is under maintenance",
                || async {
                    tokio::time::sleep(jitter(50, 200)).await;
                    Err::<String, BoxError>("Failing API intentionally failed".into())
                },
            ),
            guarded(
                registry,
                SLOW,
                "SlowService",
                "Fallback: Quick response instead of slow service",
                || async {
                    tokio::time::sleep(SLOW_LATENCY).await;
                    Ok::<_, BoxError>("Slow API Response: finally done".to_string())
                },
            ),
            guarded(
                registry,
                RANDOM,
                "RandomService",
                "Fallback: Random service temporarily unavailable",
                || async {
                    let (succeed, delay, value) = {
                        let mut rng = rand::thread_rng();
                        let succeed = rng.gen_bool(0.5);
                        let delay = if succeed {
                            rng.gen_range(200..=800)
                        } else {
                            rng.gen_range(100..=500)
                        };
                        (succeed, delay, rng.gen_range(0..1000u32))
                    };
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    if succeed {
                        Ok::<_, BoxError>(format!("Random API Response: {value}"))
                    } else {
                        Err("Random API failed".into())
                    }
                },
            ),
        ];
        Self { commands }
    }

    pub fn get(&self, name: &str) -> Option<&GuardedCommand<String>> {
        self.commands
            .iter()
            .find(|c| c.command().name() == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(|c| c.command().name())
    }
}

fn guarded<F, Fut>(
    registry: &BreakerRegistry,
    name: &str,
    group: &str,
    fallback_message: &'static str,
    operation: F,
) -> GuardedCommand<String>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, BoxError>> + Send + 'static,
{
    let command_name = name.to_string();
    Command::builder(name, group)
        .fallback(fallback_fn(move |cause: FailureCause| {
            tracing::warn!(command = %command_name, cause = %cause, "Serving fallback");
            async move { Ok::<_, BoxError>(fallback_message.to_string()) }
        }))
        .build(registry)
        .wrap(operation_fn(operation))
}

fn jitter(min_ms: u64, max_ms: u64) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}
