//! Admin HTTP API.
//!
//! # Routes
//! ```text
//! GET  /admin/status                     version, health, per-command state
//! GET  /admin/health-summary             breaker counts by state
//! GET  /admin/metrics                    rolling-window metrics, all commands
//! GET  /admin/commands/{key}/metrics     rolling-window metrics, one command
//! GET  /admin/commands/{key}/config      live config snapshot
//! PUT  /admin/commands/{key}/config      partial config update
//! POST /admin/commands/{key}/reset       force CLOSED, clear window
//! POST /admin/load-test/{key}            run the load-test harness
//! ```
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::demo::DemoCommands;
use crate::resilience::registry::BreakerRegistry;

use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<BreakerRegistry>,
    /// Commands the load-test route may target.
    pub commands: DemoCommands,
    pub api_key: Arc<str>,
}

impl AppState {
    pub fn new(registry: Arc<BreakerRegistry>, commands: DemoCommands, api_key: &str) -> Self {
        Self {
            registry,
            commands,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/health-summary", get(get_health_summary))
        .route("/admin/metrics", get(get_all_metrics))
        .route("/admin/commands/{key}/metrics", get(get_command_metrics))
        .route(
            "/admin/commands/{key}/config",
            get(get_command_config).put(update_command_config),
        )
        .route("/admin/commands/{key}/reset", post(reset_command))
        .route("/admin/load-test/{key}", post(run_load_test))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until shutdown is signalled.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API listening");

    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(crate::lifecycle::Shutdown::wait(shutdown))
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}
