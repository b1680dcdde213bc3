use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::{JobInfo, JobStatus};

/// In-memory registry of background operations started over HTTP
#[derive(Clone)]
pub struct JobManager {
    jobs: Arc<RwLock<HashMap<String, JobInfo>>>,
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new()
    }
}

impl JobManager {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a running job unless one of the same type is still running
    pub async fn try_create_job(&self, operation_type: &str) -> Result<String, String> {
        let mut jobs = self.jobs.write().await;

        if let Some(running) = jobs
            .values()
            .find(|job| job.operation_type == operation_type && job.status == JobStatus::Running)
        {
            let minutes = Utc::now()
                .signed_duration_since(running.started_at)
                .num_minutes();
            return Err(format!(
                "Operation '{}' is already running as job {} (started {}m ago)",
                operation_type, running.job_id, minutes
            ));
        }

        let job_id = format!(
            "{}_{}_{}",
            operation_type,
            Utc::now().timestamp(),
            &Uuid::new_v4().simple().to_string()[..8]
        );

        let job_info = JobInfo {
            job_id: job_id.clone(),
            operation_type: operation_type.to_string(),
            status: JobStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
            error_message: None,
        };
        jobs.insert(job_id.clone(), job_info);

        info!("Created job {}: {}", job_id, operation_type);
        Ok(job_id)
    }

    pub async fn complete_job(&self, job_id: &str, result: serde_json::Value) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
            job.result = Some(result);
            info!("Job {} completed successfully", job_id);
        }
    }

    pub async fn fail_job(&self, job_id: &str, error_message: String) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            warn!("Job {} failed: {}", job_id, error_message);
            job.error_message = Some(error_message);
        }
    }

    pub async fn get_job_status(&self, job_id: &str) -> Option<JobInfo> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id).cloned()
    }

    /// Drop finished jobs older than `max_hours`. Running jobs are kept.
    pub async fn cleanup_old_jobs(&self, max_hours: i64) -> u32 {
        let mut jobs = self.jobs.write().await;
        let cutoff = Utc::now() - chrono::Duration::hours(max_hours);
        let initial_count = jobs.len();

        jobs.retain(|job_id, job| {
            let should_keep = job.status == JobStatus::Running || job.started_at > cutoff;
            if !should_keep {
                info!("Cleaned up old job: {} ({})", job_id, job.operation_type);
            }
            should_keep
        });

        let cleaned = initial_count - jobs.len();
        if cleaned > 0 {
            info!("Cleaned up {} old jobs older than {}h", cleaned, max_hours);
        }
        cleaned as u32
    }

    pub async fn get_running_jobs(&self) -> Vec<JobInfo> {
        let jobs = self.jobs.read().await;
        jobs.values()
            .filter(|job| job.status == JobStatus::Running)
            .cloned()
            .collect()
    }
}
