//! Operational HTTP surface: health, job status, manual job trigger.

use crate::scheduler::{JobStatus, SchedulerError};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

#[derive(Serialize)]
struct HealthResponse {
    version: String,
    uptime_secs: i64,
    jobs: usize,
}

#[derive(Serialize)]
struct JobsResponse {
    jobs: Vec<JobStatus>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn build_http_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/jobs", get(list_jobs))
        .route("/v1/jobs/:name/trigger", post(trigger_job))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = (Utc::now() - state.start_time).num_seconds();
    Json(HealthResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
        jobs: state.registry.status().len(),
    })
}

async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    Json(JobsResponse {
        jobs: state.registry.status(),
    })
}

async fn trigger_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.registry.trigger_job(&name).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"triggered": name}))).into_response(),
        Err(e @ SchedulerError::UnknownJob(_)) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}
