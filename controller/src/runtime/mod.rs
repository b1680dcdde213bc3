//! Boundary to the external full-node runtime
//!
//! The controller treats the node as a black box reachable through these
//! traits. [`process::ProcessRuntime`] drives a node executable on the local
//! machine; tests substitute in-memory doubles.

pub mod process;
pub mod settings;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use crate::constants::settings_keys;

pub use process::{ProcessRuntime, ProcessRuntimeConfig};
pub use settings::JsonSettingsStore;

/// Options passed when constructing the runtime SDK
#[derive(Debug, Clone)]
pub struct SdkOptions {
    pub data_dir: PathBuf,
    /// Ask the runtime to check and apply pending database migrations
    pub database_migrate: bool,
}

/// Options passed when constructing a node instance
#[derive(Debug, Clone, Default)]
pub struct NodeOptions {
    pub private_identity: Option<Vec<u8>>,
    pub auto_seed: bool,
}

/// Filesystem locations owned by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkPaths {
    pub data_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub chain_database_path: PathBuf,
    pub wallet_database_path: PathBuf,
    pub host_file_path: PathBuf,
}

/// Entry point of a node runtime
#[async_trait]
pub trait NodeRuntime: Send + Sync {
    async fn init(&self, options: SdkOptions) -> Result<Arc<dyn NodeSdk>>;
}

/// Initialised runtime: configuration, persisted settings, node factory
#[async_trait]
pub trait NodeSdk: Send + Sync {
    fn paths(&self) -> &SdkPaths;

    /// Persisted runtime-wide settings
    fn internal(&self) -> Arc<dyn SettingsStore>;

    /// Previously persisted peer identity, if any
    fn private_identity(&self) -> Option<Vec<u8>> {
        self.internal()
            .get(settings_keys::NETWORK_IDENTITY)
            .and_then(|value| value.as_str().and_then(|s| hex::decode(s).ok()))
    }

    fn network_id(&self) -> Option<u32> {
        self.internal()
            .get(settings_keys::NETWORK_ID)
            .and_then(|value| value.as_u64())
            .and_then(|id| u32::try_from(id).ok())
    }

    async fn node(&self, options: NodeOptions) -> Result<Arc<dyn FullNode>>;
}

/// A full-node instance
#[async_trait]
pub trait FullNode: Send + Sync {
    fn is_db_open(&self) -> bool;
    async fn open_db(&self) -> Result<()>;
    async fn close_db(&self) -> Result<()>;

    /// Schema version of the chain database
    async fn database_version(&self) -> Result<u32>;

    /// Open the node's databases (if needed) and wait until it reports open
    async fn wait_for_open(&self) -> Result<()>;
    async fn start(&self) -> Result<()>;
    async fn shutdown(&self) -> Result<()>;

    /// Clear wallet state. The database must be open.
    async fn reset_wallet(&self) -> Result<()>;

    /// Secret key of the node's peer identity
    fn network_secret_key(&self) -> Vec<u8>;

    fn settings(&self) -> Arc<dyn SettingsStore>;

    fn control_client(&self) -> Arc<dyn ControlClient>;
}

/// Persisted key-value settings
#[async_trait]
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    async fn save(&self) -> Result<()>;
}

/// Client bound to a running node's control RPC
#[async_trait]
pub trait ControlClient: Send + Sync {
    async fn request(&self, route: &str, params: Value) -> Result<Value>;
}
