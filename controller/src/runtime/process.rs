//! Node runtime backed by a local node executable
//!
//! Databases live under `<data_dir>/databases`, settings in
//! `<data_dir>/internal.json`. Starting the node spawns the configured
//! executable; its output is drained into the log.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rand::RngCore;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command as AsyncCommand};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    ControlClient, FullNode, NodeOptions, NodeRuntime, NodeSdk, SdkOptions, SdkPaths,
    SettingsStore,
};
use crate::constants::{defaults, layout, settings_keys};
use crate::runtime::settings::JsonSettingsStore;

#[derive(Debug, Clone)]
pub struct ProcessRuntimeConfig {
    pub executable: String,
    pub args: Vec<String>,
    pub rpc_url: String,
    /// Network id seeded into fresh settings
    pub network_id: u32,
    /// Database version this node build writes
    pub database_version: u32,
    pub request_timeout: Option<Duration>,
}

pub struct ProcessRuntime {
    config: Arc<ProcessRuntimeConfig>,
}

impl ProcessRuntime {
    pub fn new(config: ProcessRuntimeConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

pub fn sdk_paths(data_dir: &Path) -> SdkPaths {
    let databases = data_dir.join(layout::DATABASES_DIR_NAME);
    SdkPaths {
        data_dir: data_dir.to_path_buf(),
        temp_dir: data_dir.join(layout::TEMP_DIR_NAME),
        chain_database_path: databases.join(layout::CHAIN_DIR_NAME),
        wallet_database_path: databases.join(layout::WALLET_DIR_NAME),
        host_file_path: data_dir.join(layout::HOST_FILE_NAME),
    }
}

#[async_trait]
impl NodeRuntime for ProcessRuntime {
    async fn init(&self, options: SdkOptions) -> Result<Arc<dyn NodeSdk>> {
        let paths = sdk_paths(&options.data_dir);
        fs::create_dir_all(&paths.data_dir)
            .await
            .with_context(|| format!("Failed to create data dir {}", paths.data_dir.display()))?;

        let mut defaults = Map::new();
        defaults.insert(settings_keys::NETWORK_ID.to_string(), json!(self.config.network_id));
        defaults.insert(settings_keys::IS_FIRST_RUN.to_string(), json!(true));
        let internal = JsonSettingsStore::load(
            paths.data_dir.join(layout::SETTINGS_FILE_NAME),
            defaults,
        )
        .await?;

        if options.database_migrate {
            debug!("Database migration check enabled for {}", paths.data_dir.display());
        }

        let mut client = Client::builder();
        if let Some(timeout) = self.config.request_timeout {
            client = client.timeout(timeout);
        }

        Ok(Arc::new(ProcessSdk {
            config: self.config.clone(),
            paths,
            internal: Arc::new(internal),
            client: client.build()?,
        }))
    }
}

pub struct ProcessSdk {
    config: Arc<ProcessRuntimeConfig>,
    paths: SdkPaths,
    internal: Arc<JsonSettingsStore>,
    client: Client,
}

#[async_trait]
impl NodeSdk for ProcessSdk {
    fn paths(&self) -> &SdkPaths {
        &self.paths
    }

    fn internal(&self) -> Arc<dyn SettingsStore> {
        self.internal.clone()
    }

    async fn node(&self, options: NodeOptions) -> Result<Arc<dyn FullNode>> {
        let secret_key = options.private_identity.unwrap_or_else(|| {
            let mut key = vec![0u8; 32];
            rand::thread_rng().fill_bytes(&mut key);
            key
        });

        Ok(Arc::new(ProcessNode {
            config: self.config.clone(),
            paths: self.paths.clone(),
            settings: self.internal.clone(),
            client: self.client.clone(),
            secret_key,
            auto_seed: options.auto_seed,
            db_open: AtomicBool::new(false),
            child: Mutex::new(None),
        }))
    }
}

pub struct ProcessNode {
    config: Arc<ProcessRuntimeConfig>,
    paths: SdkPaths,
    settings: Arc<JsonSettingsStore>,
    client: Client,
    secret_key: Vec<u8>,
    auto_seed: bool,
    db_open: AtomicBool,
    child: Mutex<Option<Child>>,
}

impl ProcessNode {
    fn command_args(&self) -> Vec<String> {
        let data_dir = self.paths.data_dir.to_string_lossy();
        self.config
            .args
            .iter()
            .map(|arg| arg.replace(defaults::DATA_DIR_PLACEHOLDER, &data_dir))
            .collect()
    }

    fn version_file(&self) -> std::path::PathBuf {
        self.paths.chain_database_path.join(layout::VERSION_FILE_NAME)
    }
}

fn drain_lines<R>(stream: R, label: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        while let Ok(bytes_read) = reader.read_line(&mut line).await {
            if bytes_read == 0 {
                break;
            }
            debug!("node {}: {}", label, line.trim_end());
            line.clear();
        }
    });
}

#[async_trait]
impl FullNode for ProcessNode {
    fn is_db_open(&self) -> bool {
        self.db_open.load(Ordering::SeqCst)
    }

    async fn open_db(&self) -> Result<()> {
        if self.is_db_open() {
            return Ok(());
        }
        fs::create_dir_all(&self.paths.chain_database_path).await?;
        fs::create_dir_all(&self.paths.wallet_database_path).await?;

        let version_file = self.version_file();
        if fs::metadata(&version_file).await.is_err() {
            fs::write(&version_file, self.config.database_version.to_string()).await?;
        }

        self.db_open.store(true, Ordering::SeqCst);
        debug!("Opened databases in {}", self.paths.data_dir.display());
        Ok(())
    }

    async fn close_db(&self) -> Result<()> {
        if self.db_open.swap(false, Ordering::SeqCst) {
            debug!("Closed databases in {}", self.paths.data_dir.display());
        }
        Ok(())
    }

    async fn database_version(&self) -> Result<u32> {
        match fs::read_to_string(self.version_file()).await {
            Ok(content) => content
                .trim()
                .parse::<u32>()
                .map_err(|e| anyhow!("Invalid database version '{}': {}", content.trim(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(self.config.database_version),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_for_open(&self) -> Result<()> {
        self.open_db().await
    }

    async fn start(&self) -> Result<()> {
        let mut slot = self.child.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let args = self.command_args();
        info!(
            "Spawning node process: {} {} (auto_seed: {})",
            self.config.executable,
            args.join(" "),
            self.auto_seed
        );

        let mut child = AsyncCommand::new(&self.config.executable)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn {}: {}", self.config.executable, e))?;

        if let Some(stdout) = child.stdout.take() {
            drain_lines(stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            drain_lines(stderr, "stderr");
        }

        if let Some(status) = child.try_wait()? {
            return Err(anyhow!("Node process exited immediately with {}", status));
        }

        *slot = Some(child);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        match child.try_wait()? {
            Some(status) => warn!("Node process had already exited with {}", status),
            None => {
                child.kill().await?;
                info!("Node process stopped");
            }
        }
        Ok(())
    }

    async fn reset_wallet(&self) -> Result<()> {
        if !self.is_db_open() {
            return Err(anyhow!("Cannot reset wallet while the database is closed"));
        }
        let wallet = &self.paths.wallet_database_path;
        match fs::remove_dir_all(wallet).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(wallet).await?;
        info!("Wallet state cleared at {}", wallet.display());
        Ok(())
    }

    fn network_secret_key(&self) -> Vec<u8> {
        self.secret_key.clone()
    }

    fn settings(&self) -> Arc<dyn SettingsStore> {
        self.settings.clone()
    }

    fn control_client(&self) -> Arc<dyn ControlClient> {
        Arc::new(HttpControlClient {
            client: self.client.clone(),
            base_url: self.config.rpc_url.trim_end_matches('/').to_string(),
        })
    }
}

/// JSON-over-HTTP client for the node's control RPC
pub struct HttpControlClient {
    client: Client,
    base_url: String,
}

#[async_trait]
impl ControlClient for HttpControlClient {
    async fn request(&self, route: &str, params: Value) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, route.trim_start_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&params)
            .send()
            .await
            .map_err(|e| anyhow!("RPC request to {} failed: {}", url, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("RPC {} returned {}: {}", route, status, body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| anyhow!("Failed to parse RPC response from {}: {}", route, e))
    }
}
