//! Health, status and wind ingestion endpoints.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;

use regatta_core::WindSample;

use crate::scheduler::InFlightJob;
use crate::snapshot::CacheSizes;
use crate::state::{AppState, RetryInfo};

pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/wind", post(ingest_wind))
        .layer(TraceLayer::new_for_http())
}

async fn health(
    State(state): State<Arc<AppState>>,
) -> Result<&'static str, (StatusCode, Json<serde_json::Value>)> {
    match state.repo().health_check().await {
        Ok(true) => Ok("OK"),
        Ok(false) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "storage unavailable" })),
        )),
        Err(err) => {
            tracing::warn!("Health check failed: {:#}", err);
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "storage unavailable" })),
            ))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub in_flight: Vec<InFlightJob>,
    pub executions: u64,
    pub caches: CacheSizes,
    pub retries: Vec<RetryInfo>,
    pub loops: Vec<LoopHeartbeat>,
}

#[derive(Debug, Serialize)]
pub struct LoopHeartbeat {
    pub name: String,
    pub last_tick: DateTime<Utc>,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let scheduler = state.scheduler();
    Json(StatusResponse {
        in_flight: scheduler.in_flight_jobs(),
        executions: scheduler.executions(),
        caches: state.snapshots().sizes(),
        retries: state.retries(),
        loops: state
            .loop_heartbeats()
            .into_iter()
            .map(|(name, last_tick)| LoopHeartbeat { name, last_tick })
            .collect(),
    })
}

#[derive(Debug, Deserialize)]
pub struct WindUpload {
    pub samples: Vec<WindSample>,
}

async fn ingest_wind(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WindUpload>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if payload.samples.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "no samples" })),
        ));
    }
    match state.ingest_wind(&payload.samples).await {
        Ok(written) => Ok(Json(json!({
            "received": payload.samples.len(),
            "written": written,
        }))),
        Err(err) => {
            tracing::error!("Wind ingestion failed: {:#}", err);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "wind ingestion failed" })),
            ))
        }
    }
}
