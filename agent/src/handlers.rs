//! HTTP request handlers for the agent server

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::Json as ResponseJson,
};
use chrono::Utc;
use controller::ProgressEvent;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::Operator;
use crate::types::*;
use crate::AppState;

/// Finished jobs older than this are dropped when cleanup is called without a window
const DEFAULT_JOB_RETENTION_HOURS: i64 = 24;

fn into_response(operation: &str, result: controller::Result<()>) -> ApiResponse<()> {
    match result {
        Ok(()) => {
            info!("Node {} completed", operation);
            ApiResponse::success()
        }
        Err(e) => {
            warn!("Node {} failed: {}", operation, e);
            ApiResponse::error(e.to_string())
        }
    }
}

// === Lifecycle handlers ===

pub async fn init_node(
    _auth: Operator,
    State(state): State<Arc<AppState>>,
) -> Result<ResponseJson<ApiResponse<()>>, StatusCode> {
    let result = state.controller.init().await;
    Ok(ResponseJson(into_response("init", result)))
}

pub async fn start_node(
    _auth: Operator,
    State(state): State<Arc<AppState>>,
) -> Result<ResponseJson<ApiResponse<()>>, StatusCode> {
    let result = state.controller.start().await;
    Ok(ResponseJson(into_response("start", result)))
}

pub async fn stop_node(
    _auth: Operator,
    State(state): State<Arc<AppState>>,
) -> Result<ResponseJson<ApiResponse<()>>, StatusCode> {
    let result = state.controller.stop().await;
    Ok(ResponseJson(into_response("stop", result)))
}

pub async fn restart_node(
    _auth: Operator,
    State(state): State<Arc<AppState>>,
) -> Result<ResponseJson<ApiResponse<()>>, StatusCode> {
    let result = state.controller.restart().await;
    Ok(ResponseJson(into_response("restart", result)))
}

pub async fn get_node_status(
    _auth: Operator,
    State(state): State<Arc<AppState>>,
) -> Result<ResponseJson<ApiResponse<NodeStatus>>, StatusCode> {
    let controller = &state.controller;
    let snapshots = controller.snapshot_manager();

    Ok(ResponseJson(ApiResponse::success_with_data(NodeStatus {
        state: controller.state(),
        snapshot_running: snapshots.is_running(),
        database_holder: controller.ownership().holder(),
        progress: snapshots.latest_progress(),
    })))
}

// === Async operation handlers ===

pub async fn reset_node_async(
    _auth: Operator,
    State(state): State<Arc<AppState>>,
) -> Result<ResponseJson<ApiResponse<()>>, StatusCode> {
    match state
        .execute_async_operation("node_reset", |controller| async move {
            controller.reset().await?;
            Ok(serde_json::json!({ "operation": "node_reset", "state": controller.state() }))
        })
        .await
    {
        Ok(job_id) => Ok(ResponseJson(ApiResponse::success_with_job(
            job_id,
            JobStatus::Running,
        ))),
        Err(err) => Ok(ResponseJson(ApiResponse::error(err))),
    }
}

pub async fn download_snapshot_async(
    _auth: Operator,
    State(state): State<Arc<AppState>>,
) -> Result<ResponseJson<ApiResponse<()>>, StatusCode> {
    match state
        .execute_async_operation("snapshot_download", |controller| async move {
            controller.download_snapshot().await?;
            Ok(serde_json::json!({ "operation": "snapshot_download" }))
        })
        .await
    {
        Ok(job_id) => Ok(ResponseJson(ApiResponse::success_with_job(
            job_id,
            JobStatus::Running,
        ))),
        Err(err) => Ok(ResponseJson(ApiResponse::error(err))),
    }
}

pub async fn get_snapshot_progress(
    _auth: Operator,
    State(state): State<Arc<AppState>>,
) -> Result<ResponseJson<ApiResponse<ProgressEvent>>, StatusCode> {
    let snapshots = state.controller.snapshot_manager();
    match snapshots.latest_progress() {
        Some(event) => Ok(ResponseJson(ApiResponse::success_with_data(event))),
        None => Ok(ResponseJson(ApiResponse::success())),
    }
}

// === Job status handlers ===

pub async fn get_job_status(
    _auth: Operator,
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<serde_json::Value>>, StatusCode> {
    match state.job_manager.get_job_status(&job_id).await {
        Some(job_info) => {
            let mut response = match job_info.status {
                JobStatus::Completed => ApiResponse::success_with_data(
                    job_info.result.unwrap_or(serde_json::Value::Null),
                ),
                JobStatus::Failed => ApiResponse::error(
                    job_info
                        .error_message
                        .unwrap_or_else(|| "Operation failed".to_string()),
                ),
                JobStatus::Running => ApiResponse::success(),
            };
            response.job_id = Some(job_info.job_id);
            response.job_status = Some(job_info.status);
            Ok(ResponseJson(response))
        }
        None => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn cleanup_jobs(
    _auth: Operator,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CleanupRequest>,
) -> Result<ResponseJson<ApiResponse<CleanupResponse>>, StatusCode> {
    let max_hours = request.max_hours.unwrap_or(DEFAULT_JOB_RETENTION_HOURS);
    if max_hours < 0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let cleaned_count = state.job_manager.cleanup_old_jobs(max_hours).await;
    Ok(ResponseJson(ApiResponse::success_with_data(CleanupResponse {
        cleaned_count,
        max_hours,
        timestamp: Utc::now(),
    })))
}
