use agent::{router, AppState};
use anyhow::{Context, Result};
use controller::runtime::ProcessRuntime;
use controller::snapshot::{HttpSnapshotBackend, ManifestDirectory};
use controller::{ConfigManager, NodeController};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable naming the directory that holds `main.toml`
const CONFIG_DIR_ENV: &str = "AGENT_CONFIG_DIR";

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive("agent=info".parse()?)
        .add_directive("controller=info".parse()?)
        .add_directive("tower_http=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    fmt().with_env_filter(env_filter).init();

    info!("Starting node agent");

    let config_dir = std::env::var(CONFIG_DIR_ENV).unwrap_or_else(|_| "config".to_string());
    let config_manager = ConfigManager::new(&config_dir).await?;
    let config = config_manager.get_current_config();

    let runtime = Arc::new(ProcessRuntime::new(config.runtime_config()));

    let mut client = reqwest::Client::builder();
    if let Some(timeout) = config.snapshot.request_timeout() {
        client = client.timeout(timeout);
    }
    let client = client.build().context("Failed to build HTTP client")?;
    let backend = Arc::new(
        HttpSnapshotBackend::new(client)
            .with_retries(config.snapshot.download_retries, config.snapshot.retry_backoff()),
    );
    let manifests = ManifestDirectory::with_overrides(&config.snapshot.manifest_overrides()?);

    let controller = Arc::new(NodeController::new(
        runtime,
        config.data_dir.clone(),
        backend,
        manifests,
    ));

    if config.auto_start {
        info!("Auto-start enabled, bringing the node up");
        let starter = controller.clone();
        tokio::spawn(async move {
            if let Err(e) = starter.init().await {
                error!("Auto-start init failed: {}", e);
                return;
            }
            if let Err(e) = starter.start().await {
                error!("Auto-start failed: {}", e);
            }
        });
    }

    let api_key = config.api_key.clone().unwrap_or_default();
    let app = router(Arc::new(AppState::new(api_key, controller.clone())));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Node agent listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down node");
    if let Err(e) = controller.stop().await {
        warn!("Node did not stop cleanly: {}", e);
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
