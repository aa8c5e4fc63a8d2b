//! Router assembly.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use aicg_models::{ChapterId, JobId};

use crate::error::{ApiError, ApiResult};
use crate::service::{HistoryQuery, JobView, PipelineService, SubmitJobRequest};

pub type SharedService = Arc<dyn PipelineService>;

/// Build the HTTP controller over a pipeline service.
pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/jobs", post(submit_job))
        .route("/api/jobs/:id", get(job_status))
        .route("/api/jobs/:id/cancel", post(cancel_job))
        .route("/api/history", get(list_history))
        .route("/api/history/:id/select", post(select_history))
        .route(
            "/api/chapters/:id/accept_partial",
            post(accept_partial_materials),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}

async fn health(
    State(service): State<SharedService>,
) -> (StatusCode, Json<crate::service::HealthReport>) {
    let report = service.health().await;
    let status = if report.healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn submit_job(
    State(service): State<SharedService>,
    Json(request): Json<SubmitJobRequest>,
) -> ApiResult<Json<JobView>> {
    let job = service.submit_job(request).await?;
    Ok(Json(job))
}

async fn job_status(
    State(service): State<SharedService>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobView>> {
    let job_id = JobId::parse(&id).map_err(|_| ApiError::bad_request("invalid job id"))?;
    let job = service.job_status(job_id).await?;
    Ok(Json(job))
}

async fn cancel_job(
    State(service): State<SharedService>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let job_id = JobId::parse(&id).map_err(|_| ApiError::bad_request("invalid job id"))?;
    service.cancel_job(job_id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn list_history(
    State(service): State<SharedService>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let entries = service.list_history(query).await?;
    Ok(Json(json!({ "entries": entries })))
}

async fn select_history(
    State(service): State<SharedService>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let url = service.select_history(id).await?;
    Ok(Json(json!({ "current_url": url })))
}

async fn accept_partial_materials(
    State(service): State<SharedService>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let chapter_id =
        ChapterId::parse(&id).map_err(|_| ApiError::bad_request("invalid chapter id"))?;
    service.accept_partial_materials(chapter_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
