use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AppState;
use crate::config::schema::{BreakerConfig, BreakerConfigPatch};
use crate::loadtest::{LoadTest, LoadTestReport, MAX_LOAD_TEST_COUNT};
use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::registry::{BreakerMetrics, BreakerStatus, RegistryError};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let status = match e {
            RegistryError::UnknownCommand(_) => StatusCode::NOT_FOUND,
            RegistryError::InvalidConfig { .. } => StatusCode::BAD_REQUEST,
        };
        api_error(status, e.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    /// `HEALTHY` while no breaker is open, `DEGRADED` otherwise.
    pub status: &'static str,
    pub summary: HealthSummary,
    pub commands: Vec<BreakerStatus>,
}

/// Breaker counts by state.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct HealthSummary {
    pub total: usize,
    pub open: usize,
    pub half_open: usize,
    pub closed: usize,
    pub system_health: &'static str,
}

impl HealthSummary {
    pub fn from_statuses(statuses: &[BreakerStatus]) -> Self {
        let mut summary = statuses.iter().fold(Self::default(), |mut acc, status| {
            acc.total += 1;
            match status.state {
                CircuitState::Open => acc.open += 1,
                CircuitState::HalfOpen => acc.half_open += 1,
                CircuitState::Closed => acc.closed += 1,
            }
            acc
        });
        summary.system_health = if summary.open == 0 {
            "HEALTHY"
        } else {
            "DEGRADED"
        };
        summary
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigUpdated {
    pub command: String,
    pub changed: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct ResetDone {
    pub command: String,
    pub state: CircuitState,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let commands = state.registry.statuses();
    let summary = HealthSummary::from_statuses(&commands);
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: summary.system_health,
        summary,
        commands,
    })
}

pub async fn get_health_summary(State(state): State<AppState>) -> Json<HealthSummary> {
    Json(HealthSummary::from_statuses(&state.registry.statuses()))
}

pub async fn get_all_metrics(State(state): State<AppState>) -> Json<Vec<BreakerMetrics>> {
    Json(state.registry.all_metrics())
}

pub async fn get_command_metrics(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<BreakerMetrics>, ApiError> {
    let breaker = state
        .registry
        .lookup(&key)
        .ok_or(RegistryError::UnknownCommand(key))?;
    Ok(Json(breaker.metrics()))
}

pub async fn get_command_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<BreakerConfig>, ApiError> {
    let breaker = state
        .registry
        .lookup(&key)
        .ok_or(RegistryError::UnknownCommand(key))?;
    Ok(Json(BreakerConfig::clone(&breaker.config())))
}

pub async fn update_command_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(patch): Json<BreakerConfigPatch>,
) -> Result<Json<ConfigUpdated>, ApiError> {
    let changed = state.registry.update_config(&key, &patch)?;
    Ok(Json(ConfigUpdated {
        command: key,
        changed,
    }))
}

pub async fn reset_command(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ResetDone>, ApiError> {
    state.registry.reset(&key)?;
    Ok(Json(ResetDone {
        command: key,
        state: CircuitState::Closed,
    }))
}

pub async fn run_load_test(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<LoadTest>,
) -> Result<Json<LoadTestReport>, ApiError> {
    if params.count == 0 || params.concurrency == 0 {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "count and concurrency must be greater than 0",
        ));
    }
    if params.count > MAX_LOAD_TEST_COUNT {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("count must not exceed {MAX_LOAD_TEST_COUNT}"),
        ));
    }
    let command = state
        .commands
        .get(&key)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("no runnable command `{key}`")))?;
    Ok(Json(params.run(command).await))
}
