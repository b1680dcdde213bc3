use chrono::{DateTime, Utc};
use controller::{DatabaseHolder, LifecycleState, ProgressEvent};
use serde::{Deserialize, Serialize};

// === REQUEST STRUCTURES ===

#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    pub max_hours: Option<i64>,
}

// === RESPONSE STRUCTURES ===

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_status: Option<JobStatus>,
}

impl<T> ApiResponse<T> {
    pub fn success() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            job_id: None,
            job_status: None,
        }
    }

    pub fn success_with_data(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            job_id: None,
            job_status: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            job_id: None,
            job_status: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn success_with_job(job_id: String, status: JobStatus) -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            job_id: Some(job_id),
            job_status: Some(status),
        }
    }
}

/// Snapshot of the controller as reported by `/node/status`
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub state: LifecycleState,
    pub snapshot_running: bool,
    pub database_holder: Option<DatabaseHolder>,
    pub progress: Option<ProgressEvent>,
}

// === JOB TRACKING ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub job_id: String,
    pub operation_type: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupResponse {
    pub cleaned_count: u32,
    pub max_hours: i64,
    pub timestamp: DateTime<Utc>,
}
