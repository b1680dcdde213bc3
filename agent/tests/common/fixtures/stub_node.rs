use anyhow::Result;
use async_trait::async_trait;
use controller::errors::SnapshotError;
use controller::runtime::process::sdk_paths;
use controller::runtime::{
    ControlClient, FullNode, NodeOptions, NodeRuntime, NodeSdk, SdkOptions, SdkPaths,
    SettingsStore,
};
use controller::snapshot::{
    DownloadProgress, SnapshotBackend, SnapshotDownloader, SnapshotInstaller, SnapshotManifest,
    UnzipProgress,
};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Semaphore;

#[derive(Default)]
pub struct StubSettings {
    values: RwLock<Map<String, Value>>,
}

#[async_trait]
impl SettingsStore for StubSettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.values.write().unwrap().insert(key.to_string(), value);
    }

    async fn save(&self) -> Result<()> {
        Ok(())
    }
}

/// Runtime whose node does nothing but track whether its database is open
pub struct StubRuntime {
    settings: Arc<StubSettings>,
}

impl StubRuntime {
    pub fn new() -> Arc<Self> {
        let settings = StubSettings::default();
        settings.set("networkId", json!(1));
        settings.set("isFirstRun", json!(false));
        Arc::new(Self {
            settings: Arc::new(settings),
        })
    }
}

#[async_trait]
impl NodeRuntime for StubRuntime {
    async fn init(&self, options: SdkOptions) -> Result<Arc<dyn NodeSdk>> {
        Ok(Arc::new(StubSdk {
            paths: sdk_paths(&options.data_dir),
            settings: self.settings.clone(),
        }))
    }
}

struct StubSdk {
    paths: SdkPaths,
    settings: Arc<StubSettings>,
}

#[async_trait]
impl NodeSdk for StubSdk {
    fn paths(&self) -> &SdkPaths {
        &self.paths
    }

    fn internal(&self) -> Arc<dyn SettingsStore> {
        self.settings.clone()
    }

    async fn node(&self, _options: NodeOptions) -> Result<Arc<dyn FullNode>> {
        Ok(Arc::new(StubNode {
            settings: self.settings.clone(),
            db_open: AtomicBool::new(false),
        }))
    }
}

struct StubNode {
    settings: Arc<StubSettings>,
    db_open: AtomicBool,
}

#[async_trait]
impl FullNode for StubNode {
    fn is_db_open(&self) -> bool {
        self.db_open.load(Ordering::SeqCst)
    }

    async fn open_db(&self) -> Result<()> {
        self.db_open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close_db(&self) -> Result<()> {
        self.db_open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn database_version(&self) -> Result<u32> {
        Ok(3)
    }

    async fn wait_for_open(&self) -> Result<()> {
        self.open_db().await
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn reset_wallet(&self) -> Result<()> {
        Ok(())
    }

    fn network_secret_key(&self) -> Vec<u8> {
        vec![0x11; 32]
    }

    fn settings(&self) -> Arc<dyn SettingsStore> {
        self.settings.clone()
    }

    fn control_client(&self) -> Arc<dyn ControlClient> {
        Arc::new(NullClient)
    }
}

struct NullClient;

#[async_trait]
impl ControlClient for NullClient {
    async fn request(&self, _route: &str, _params: Value) -> Result<Value> {
        Ok(Value::Null)
    }
}

/// Snapshot backend that succeeds without touching the network.
///
/// A gated backend parks every download until [`StubBackend::release`].
#[derive(Clone, Default)]
pub struct StubBackend {
    gate: Option<Arc<Semaphore>>,
}

impl StubBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Arc::new(Semaphore::new(0))),
        })
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }
}

impl SnapshotBackend for StubBackend {
    fn downloader(
        &self,
        manifest_url: &str,
        dest_dir: &Path,
        _node_database_version: u32,
    ) -> Box<dyn SnapshotDownloader> {
        Box::new(StubDownloader {
            manifest_url: manifest_url.to_string(),
            archive: dest_dir.join("snapshot.tar.gz"),
            gate: self.gate.clone(),
        })
    }

    fn installer(&self, archive: PathBuf, _paths: &SdkPaths) -> Box<dyn SnapshotInstaller> {
        Box::new(StubInstaller { archive })
    }
}

struct StubDownloader {
    manifest_url: String,
    archive: PathBuf,
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl SnapshotDownloader for StubDownloader {
    async fn manifest(&self) -> Result<SnapshotManifest, SnapshotError> {
        Ok(SnapshotManifest {
            file_size: 100,
            checksum: "00".to_string(),
            database_version: 3,
            download_url: self.manifest_url.replace("manifest.json", "snapshot.tar.gz"),
            block_sequence: None,
            timestamp: None,
        })
    }

    async fn download(&self, on_progress: DownloadProgress<'_>) -> Result<(), SnapshotError> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        on_progress(0, 100);
        Ok(())
    }

    async fn verify_checksum(&self, _cleanup: bool) -> Result<Option<PathBuf>, SnapshotError> {
        Ok(Some(self.archive.clone()))
    }
}

struct StubInstaller {
    archive: PathBuf,
}

#[async_trait]
impl SnapshotInstaller for StubInstaller {
    fn archive_path(&self) -> &Path {
        &self.archive
    }

    async fn unzip(&self, on_progress: UnzipProgress<'_>) -> Result<(), SnapshotError> {
        on_progress(1, 0, 1);
        Ok(())
    }

    async fn replace_database(&self) -> Result<(), SnapshotError> {
        Ok(())
    }
}
