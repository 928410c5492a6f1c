// src/api.rs
//! Operator HTTP surface: manual triggers, queue stats, audit queries.
//! These are thin wrappers over the scheduler and the queue; nothing here
//! participates in ingestion's correctness guarantees.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::model::QueueStats;
use crate::queue::JobQueue;
use crate::scheduler::{Scheduler, TriggerError};
use crate::store::{AuditRow, IngestLogStore};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub queue: Arc<JobQueue>,
    pub log: Arc<dyn IngestLogStore>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/sources/{id}/trigger", post(trigger_source))
        .route("/api/trigger-all", post(trigger_all))
        .route("/api/stats", get(stats))
        .route("/api/audit", get(audit))
        .route("/api/queue/pause", post(pause))
        .route("/api/queue/resume", post(resume))
        .route("/api/queue/cleanup", post(cleanup))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct TriggerResp {
    job_ids: Vec<Uuid>,
}

#[derive(Serialize)]
struct TriggerAllResp {
    total: usize,
    job_ids: Vec<Uuid>,
    failures: Vec<TriggerFailure>,
}

#[derive(Serialize)]
struct TriggerFailure {
    source_id: Uuid,
    error: String,
}

fn trigger_status(err: &TriggerError) -> StatusCode {
    match err {
        TriggerError::NotFound(_) => StatusCode::NOT_FOUND,
        TriggerError::Inactive(_) => StatusCode::CONFLICT,
        TriggerError::NoIngestionMethod(_) => StatusCode::UNPROCESSABLE_ENTITY,
        TriggerError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn trigger_source(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TriggerResp>, (StatusCode, String)> {
    match state.scheduler.trigger_source(id).await {
        Ok(job_ids) => Ok(Json(TriggerResp { job_ids })),
        Err(e) => Err((trigger_status(&e), e.to_string())),
    }
}

async fn trigger_all(
    State(state): State<AppState>,
) -> Result<Json<TriggerAllResp>, (StatusCode, String)> {
    let report = state
        .scheduler
        .trigger_all()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(TriggerAllResp {
        total: report.job_ids.len(),
        job_ids: report.job_ids,
        failures: report
            .failures
            .into_iter()
            .map(|(source_id, error)| TriggerFailure { source_id, error })
            .collect(),
    }))
}

async fn stats(State(state): State<AppState>) -> Json<QueueStats> {
    Json(state.queue.stats())
}

#[derive(Deserialize)]
struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    limit: usize,
}

fn default_audit_limit() -> usize {
    50
}

async fn audit(
    State(state): State<AppState>,
    Query(q): Query<AuditQuery>,
) -> Result<Json<Vec<AuditRow>>, (StatusCode, String)> {
    let rows = state
        .log
        .recent(q.limit.min(500))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(rows))
}

async fn pause(State(state): State<AppState>) -> StatusCode {
    state.queue.pause();
    StatusCode::NO_CONTENT
}

async fn resume(State(state): State<AppState>) -> StatusCode {
    state.queue.resume();
    StatusCode::NO_CONTENT
}

#[derive(Serialize)]
struct CleanupResp {
    removed: usize,
}

async fn cleanup(State(state): State<AppState>) -> Json<CleanupResp> {
    let removed = state.queue.cleanup(chrono::Utc::now());
    Json(CleanupResp { removed })
}
