/**
 * API REST PULSE - Lecture de l'état du moniteur
 *
 * ROLE :
 * Read-only view over what the monitor wrote to the store (system ids,
 * system snapshots, open worker issues) plus the live monitor health.
 *
 * SÉCURITÉ :
 * - Header x-api-key required on every route except /health
 * - No key configured means every protected route answers 401
 */

use crate::error::MonitorError;
use crate::health::{HealthTracker, MonitorHealth};
use crate::models::{SystemSnapshot, WorkerIssue};
use crate::monitor::MonitorHandle;
use crate::store::SharedReader;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::{error, warn};

pub const API_KEY_ENV: &str = "PULSE_API_KEY";

#[derive(Clone)]
pub struct AppState {
    pub reader: SharedReader,
    pub health: HealthTracker,
    pub monitor: Option<MonitorHandle>,
    pub api_key: Option<String>,
}

impl AppState {
    /// State with the API key taken from `PULSE_API_KEY`.
    pub fn from_env(reader: SharedReader, health: HealthTracker, monitor: Option<MonitorHandle>) -> Self {
        let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        Self {
            reader,
            health,
            monitor,
            api_key,
        }
    }
}

#[derive(Debug, Serialize)]
struct InstancesView {
    worker_id: String,
    interval: u64,
    count: usize,
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let Some(expected) = app.api_key.as_deref() else {
        warn!("{API_KEY_ENV} not set, API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/monitor/health", get(get_monitor_health))
        .route("/systems", get(list_systems))
        .route("/systems/{id}", get(get_system))
        .route("/workers/{id}/issue", get(get_worker_issue))
        .route("/workers/{id}/instances", get(get_worker_instances))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

fn internal(e: impl std::fmt::Display) -> StatusCode {
    error!("store read failed: {e}");
    StatusCode::INTERNAL_SERVER_ERROR
}

// GET /monitor/health
async fn get_monitor_health(State(app): State<AppState>) -> Json<MonitorHealth> {
    Json(app.health.get_health())
}

// GET /systems
async fn list_systems(State(app): State<AppState>) -> Result<Json<Vec<String>>, StatusCode> {
    let ids = app.reader.system_ids().await.map_err(internal)?;
    Ok(Json(ids))
}

// GET /systems/{id}
async fn get_system(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SystemSnapshot>, StatusCode> {
    let snapshot = app.reader.system_snapshot(&id).await.map_err(internal)?;
    snapshot.map(Json).ok_or(StatusCode::NOT_FOUND)
}

// GET /workers/{id}/issue
async fn get_worker_issue(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkerIssue>, StatusCode> {
    let issue = app.reader.worker_issue(&id).await.map_err(internal)?;
    issue.map(Json).ok_or(StatusCode::NOT_FOUND)
}

// GET /workers/{id}/instances (live count of the current interval)
async fn get_worker_instances(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InstancesView>, StatusCode> {
    let monitor = app.monitor.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
    match monitor.instance_count(&id).await {
        Ok(Some(c)) => Ok(Json(InstancesView {
            worker_id: id,
            interval: c.interval,
            count: c.count,
        })),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(MonitorError::NotRunning) => Err(StatusCode::SERVICE_UNAVAILABLE),
        Err(e) => Err(internal(e)),
    }
}
