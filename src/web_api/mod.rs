//! WebAPI - HTTP Endpoints
//!
//! ## Responsibilities
//!
//! - Event stream endpoint (`/sse`) with bearer-token handshake
//! - Health and status endpoints
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::models::{ApiResponse, HealthResponse};
use crate::polling_orchestrator::SchedulerStats;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
    };

    Json(response)
}

/// Service status payload
#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub scheduler: SchedulerStats,
    pub subscribers: u64,
    pub check_interval_ms: u64,
}

/// Scheduler counters and live subscriber count
pub async fn service_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = ServiceStatus {
        scheduler: state.polling.stats().await,
        subscribers: state.realtime.connection_count(),
        check_interval_ms: state.config.check_interval.as_millis() as u64,
    };

    Json(ApiResponse::success(status))
}
