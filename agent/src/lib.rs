//! HTTP control surface for the node lifecycle controller
//!
//! Short transitions (init, start, stop, restart) answer synchronously.
//! Snapshot downloads and resets run as background jobs polled through
//! `/operation/status/{job_id}`.

pub mod auth;
pub mod handlers;
pub mod services;
pub mod types;

use axum::{
    routing::{get, post},
    Router,
};
use controller::NodeController;
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use services::JobManager;

pub struct AppState {
    pub api_key: String,
    pub controller: Arc<NodeController>,
    pub job_manager: JobManager,
}

impl AppState {
    pub fn new(api_key: impl Into<String>, controller: Arc<NodeController>) -> Self {
        Self {
            api_key: api_key.into(),
            controller,
            job_manager: JobManager::new(),
        }
    }

    /// Spawn `operation` as a tracked job and return its id.
    ///
    /// Refused while another job of the same type is running.
    pub async fn execute_async_operation<F, Fut>(
        &self,
        operation_type: &str,
        operation: F,
    ) -> Result<String, String>
    where
        F: FnOnce(Arc<NodeController>) -> Fut + Send + 'static,
        Fut: Future<Output = controller::Result<serde_json::Value>> + Send + 'static,
    {
        let job_id = self.job_manager.try_create_job(operation_type).await?;

        let job_manager = self.job_manager.clone();
        let controller = self.controller.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            match operation(controller).await {
                Ok(result) => job_manager.complete_job(&id, result).await,
                Err(e) => job_manager.fail_job(&id, e.to_string()).await,
            }
        });

        Ok(job_id)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // === LIFECYCLE ===
        .route("/node/init", post(handlers::init_node))
        .route("/node/start", post(handlers::start_node))
        .route("/node/stop", post(handlers::stop_node))
        .route("/node/restart", post(handlers::restart_node))
        .route("/node/reset", post(handlers::reset_node_async))
        .route("/node/status", get(handlers::get_node_status))
        // === SNAPSHOT ===
        .route("/snapshot/download", post(handlers::download_snapshot_async))
        .route("/snapshot/progress", get(handlers::get_snapshot_progress))
        // === JOBS ===
        .route("/operation/status/{job_id}", get(handlers::get_job_status))
        .route("/operations/cleanup", post(handlers::cleanup_jobs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
