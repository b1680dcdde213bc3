//! Scripted snapshot backend
//!
//! The downloader writes fixed-size chunks to the temp directory and the
//! installer "extracts" a fixed set of files. Both journal their stages.

use async_trait::async_trait;
use controller::errors::SnapshotError;
use controller::runtime::SdkPaths;
use controller::snapshot::{
    DownloadProgress, SnapshotBackend, SnapshotDownloader, SnapshotInstaller, SnapshotManifest,
    UnzipProgress,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::mock_runtime::Journal;

pub const ARCHIVE_NAME: &str = "snapshot.tar.gz";

pub struct BackendState {
    pub journal: Arc<Journal>,
    pub manifest: Mutex<SnapshotManifest>,
    /// Sizes of the chunks the download delivers
    pub chunks: Mutex<Vec<u64>>,
    /// Files the unzip step produces, in order
    pub files: Mutex<Vec<(String, String)>>,
    pub checksum_ok: AtomicBool,
    pub fail_replace: AtomicBool,
    pub downloads: AtomicUsize,
    /// Signalled once the first chunk is written
    pub download_started: Notify,
    /// When set, the download waits for this after its first chunk
    pub gate: Mutex<Option<Arc<Notify>>>,
}

#[derive(Clone)]
pub struct MockBackend {
    pub state: Arc<BackendState>,
}

impl MockBackend {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self {
            state: Arc::new(BackendState {
                journal,
                manifest: Mutex::new(SnapshotManifest {
                    file_size: 1000,
                    checksum: "deadbeef".to_string(),
                    database_version: 3,
                    download_url: format!("https://snapshots.example.com/{}", ARCHIVE_NAME),
                    block_sequence: None,
                    timestamp: None,
                }),
                chunks: Mutex::new(vec![400, 600]),
                files: Mutex::new(vec![
                    ("000001.log".to_string(), "blocks".to_string()),
                    ("MANIFEST-000001".to_string(), "manifest".to_string()),
                ]),
                checksum_ok: AtomicBool::new(true),
                fail_replace: AtomicBool::new(false),
                downloads: AtomicUsize::new(0),
                download_started: Notify::new(),
                gate: Mutex::new(None),
            }),
        }
    }

    pub fn set_checksum_ok(&self, ok: bool) {
        self.state.checksum_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_fail_replace(&self, fail: bool) {
        self.state.fail_replace.store(fail, Ordering::SeqCst);
    }

    /// Hold every download after its first chunk until the returned
    /// notify is signalled
    pub fn gate(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.state.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn downloads(&self) -> usize {
        self.state.downloads.load(Ordering::SeqCst)
    }

    pub fn files(&self) -> Vec<(String, String)> {
        self.state.files.lock().unwrap().clone()
    }

    pub fn arc(&self) -> Arc<dyn SnapshotBackend> {
        Arc::new(self.clone())
    }
}

impl SnapshotBackend for MockBackend {
    fn downloader(
        &self,
        _manifest_url: &str,
        dest_dir: &Path,
        _node_database_version: u32,
    ) -> Box<dyn SnapshotDownloader> {
        Box::new(MockDownloader {
            state: self.state.clone(),
            path: dest_dir.join(ARCHIVE_NAME),
        })
    }

    fn installer(&self, archive: PathBuf, paths: &SdkPaths) -> Box<dyn SnapshotInstaller> {
        Box::new(MockInstaller {
            state: self.state.clone(),
            archive,
            staging: paths.temp_dir.join("snapshot.staging"),
            chain: paths.chain_database_path.clone(),
        })
    }
}

pub struct MockDownloader {
    state: Arc<BackendState>,
    path: PathBuf,
}

#[async_trait]
impl SnapshotDownloader for MockDownloader {
    async fn manifest(&self) -> Result<SnapshotManifest, SnapshotError> {
        Ok(self.state.manifest.lock().unwrap().clone())
    }

    async fn download(&self, on_progress: DownloadProgress<'_>) -> Result<(), SnapshotError> {
        self.state.downloads.fetch_add(1, Ordering::SeqCst);
        self.state.journal.push("download:start");

        let chunks = self.state.chunks.lock().unwrap().clone();
        let gate = self.state.gate.lock().unwrap().clone();
        let mut written = Vec::new();
        let mut current = 0u64;

        for (index, size) in chunks.into_iter().enumerate() {
            written.extend(std::iter::repeat(0x5a).take(size as usize));
            tokio::fs::write(&self.path, &written)
                .await
                .map_err(|e| SnapshotError::filesystem(&self.path, e))?;

            let previous = current;
            current += size;
            on_progress(previous, current);

            if index == 0 {
                self.state.download_started.notify_one();
                if let Some(gate) = &gate {
                    gate.notified().await;
                }
            }
        }

        self.state.journal.push("download:done");
        Ok(())
    }

    async fn verify_checksum(&self, cleanup: bool) -> Result<Option<PathBuf>, SnapshotError> {
        self.state.journal.push("download:verify");
        if self.state.checksum_ok.load(Ordering::SeqCst) {
            return Ok(Some(self.path.clone()));
        }
        if cleanup {
            tokio::fs::remove_file(&self.path)
                .await
                .map_err(|e| SnapshotError::filesystem(&self.path, e))?;
        }
        Ok(None)
    }
}

pub struct MockInstaller {
    state: Arc<BackendState>,
    archive: PathBuf,
    staging: PathBuf,
    chain: PathBuf,
}

#[async_trait]
impl SnapshotInstaller for MockInstaller {
    fn archive_path(&self) -> &Path {
        &self.archive
    }

    async fn unzip(&self, on_progress: UnzipProgress<'_>) -> Result<(), SnapshotError> {
        self.state.journal.push("install:unzip");
        let files = self.state.files.lock().unwrap().clone();
        tokio::fs::create_dir_all(&self.staging)
            .await
            .map_err(|e| SnapshotError::filesystem(&self.staging, e))?;

        let total = files.len() as u64;
        for (index, (name, content)) in files.iter().enumerate() {
            let path = self.staging.join(name);
            tokio::fs::write(&path, content)
                .await
                .map_err(|e| SnapshotError::filesystem(&path, e))?;
            on_progress(total, index as u64, index as u64 + 1);
        }
        Ok(())
    }

    async fn replace_database(&self) -> Result<(), SnapshotError> {
        self.state.journal.push("install:replace");
        if self.state.fail_replace.load(Ordering::SeqCst) {
            return Err(SnapshotError::Install {
                path: self.chain.clone(),
                reason: "injected failure".to_string(),
            });
        }

        if tokio::fs::metadata(&self.chain).await.is_ok() {
            tokio::fs::remove_dir_all(&self.chain)
                .await
                .map_err(|e| SnapshotError::filesystem(&self.chain, e))?;
        }
        if let Some(parent) = self.chain.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SnapshotError::filesystem(parent, e))?;
        }
        tokio::fs::rename(&self.staging, &self.chain)
            .await
            .map_err(|e| SnapshotError::filesystem(&self.chain, e))
    }
}
