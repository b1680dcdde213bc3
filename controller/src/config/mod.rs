pub mod manager;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use manager::ConfigManager;

use crate::constants::{defaults, networks, snapshot};
use crate::errors::ConfigError;
use crate::runtime::ProcessRuntimeConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub data_dir: PathBuf,
    pub api_key: Option<String>,
    /// Start the node as soon as the agent comes up
    #[serde(default)]
    pub auto_start: bool,
    pub node: NodeSection,
    #[serde(default)]
    pub snapshot: SnapshotSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    pub executable: String,
    /// `{data_dir}` is replaced with the configured data directory
    #[serde(default)]
    pub args: Vec<String>,
    pub rpc_url: String,
    #[serde(default = "default_network_id")]
    pub network_id: u32,
    pub database_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSection {
    /// Network id (as a string key) to manifest URL
    #[serde(default)]
    pub manifest_urls: HashMap<String, String>,
    #[serde(default = "default_download_retries")]
    pub download_retries: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_seconds: u64,
    pub request_timeout_seconds: Option<u64>,
}

impl Default for SnapshotSection {
    fn default() -> Self {
        Self {
            manifest_urls: HashMap::new(),
            download_retries: default_download_retries(),
            retry_backoff_seconds: default_retry_backoff(),
            request_timeout_seconds: None,
        }
    }
}

fn default_host() -> String {
    defaults::AGENT_HOST.to_string()
}

fn default_port() -> u16 {
    defaults::AGENT_PORT
}

fn default_network_id() -> u32 {
    networks::MAINNET_ID
}

fn default_download_retries() -> u32 {
    snapshot::DOWNLOAD_RETRIES
}

fn default_retry_backoff() -> u64 {
    snapshot::RETRY_BACKOFF.as_secs()
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "port".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "data_dir".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.node.executable.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "node.executable".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        self.snapshot.manifest_overrides()?;
        Ok(())
    }

    pub fn runtime_config(&self) -> ProcessRuntimeConfig {
        ProcessRuntimeConfig {
            executable: self.node.executable.clone(),
            args: self.node.args.clone(),
            rpc_url: self.node.rpc_url.clone(),
            network_id: self.node.network_id,
            database_version: self.node.database_version,
            request_timeout: self.snapshot.request_timeout(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl SnapshotSection {
    /// Manifest URL overrides keyed by parsed network id
    pub fn manifest_overrides(&self) -> Result<HashMap<u32, String>, ConfigError> {
        let mut overrides = HashMap::new();
        for (key, url) in &self.manifest_urls {
            let network_id: u32 = key.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: format!("snapshot.manifest_urls.{}", key),
                reason: "key must be a network id".to_string(),
            })?;
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    field: format!("snapshot.manifest_urls.{}", key),
                    reason: format!("'{}' is not an http(s) URL", url),
                });
            }
            overrides.insert(network_id, url.clone());
        }
        Ok(overrides)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_seconds)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_seconds.map(Duration::from_secs)
    }
}
