//! Circuit-breaker demo service.
//!
//! # Architecture Overview
//!
//! ```text
//!   breaker-cli / curl
//!          │
//!          ▼
//!   ┌──────────────┐     ┌──────────────────────────────────────────┐
//!   │  admin API   │────▶│ BreakerRegistry                          │
//!   │  (axum)      │     │   callNormalApi  → CommandBreaker         │
//!   └──────────────┘     │   callFailingApi → CommandBreaker         │
//!          │             │   callSlowApi    → CommandBreaker         │
//!          ▼             │   callRandomApi  → CommandBreaker         │
//!   ┌──────────────┐     └──────────────────────────────────────────┘
//!   │  load test   │──▶ demo commands ──▶ executor ──▶ fallback
//!   └──────────────┘                           ▲
//!                                              │ apply_snapshot
//!   config file ──▶ watcher / poller ──────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use command_breaker::admin::{self, AppState};
use command_breaker::config::{
    load_config, ConfigPoller, ConfigWatcher, EngineConfig, FileConfigSource, ReloadMode,
};
use command_breaker::demo::DemoCommands;
use command_breaker::lifecycle::Shutdown;
use command_breaker::observability::{logging, metrics};
use command_breaker::resilience::BreakerRegistry;

#[derive(Parser)]
#[command(name = "command-breaker")]
#[command(about = "Circuit-breaker protected demo service", long_about = None)]
struct Args {
    /// Path to the TOML config file. Defaults are used if it does not exist.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_present = args.config.exists();
    let config = if file_present {
        load_config(&args.config)?
    } else {
        EngineConfig::default()
    };

    logging::init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        from_file = file_present,
        "command-breaker starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = Arc::new(BreakerRegistry::new(config.clone()));
    let commands = DemoCommands::register(&registry);
    let shutdown = Shutdown::new();

    // Keeps the file watcher alive for the lifetime of the process.
    let _watcher = if file_present {
        spawn_reload(&args.config, &config, &registry, &shutdown)?
    } else {
        None
    };

    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AppState::new(registry.clone(), commands, &config.admin.api_key);
        Some(tokio::spawn(admin::serve(listener, state, shutdown.subscribe())))
    } else {
        tracing::info!("Admin API disabled");
        None
    };

    shutdown.trigger_on_ctrl_c().await;

    if let Some(task) = admin_task {
        task.await??;
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Start the configured reload mechanism.
fn spawn_reload(
    path: &Path,
    config: &EngineConfig,
    registry: &Arc<BreakerRegistry>,
    shutdown: &Shutdown,
) -> Result<Option<notify::RecommendedWatcher>, notify::Error> {
    match config.reload.mode {
        ReloadMode::Off => Ok(None),
        ReloadMode::Poll => {
            let poller = ConfigPoller::new(
                Arc::new(FileConfigSource::new(path)),
                registry.clone(),
                Duration::from_millis(config.reload.poll_interval_ms),
            )
            .with_current(config.clone());
            tokio::spawn(poller.run(shutdown.subscribe()));
            Ok(None)
        }
        ReloadMode::Watch => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let handle = watcher.run(config.clone())?;
            let registry = registry.clone();
            let mut stop = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(snapshot) = updates.recv() => {
                            let applied = registry.apply_snapshot(snapshot);
                            tracing::info!(breakers_changed = applied.len(), "Applied reloaded config");
                        }
                        _ = stop.recv() => break,
                    }
                }
            });
            Ok(Some(handle))
        }
    }
}
