use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::fs;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, instrument, warn};

use super::downloader::{HttpSnapshotDownloader, SnapshotDownloader};
use super::installer::{recover_interrupted_swap, ArchiveInstaller, SnapshotInstaller};
use super::manifest::ManifestDirectory;
use super::progress::{ProgressEvent, ProgressHub};
use crate::constants::snapshot::{DOWNLOAD_RETRIES, RETRY_BACKOFF, STAGING_DIR_NAME};
use crate::deferred::Deferred;
use crate::errors::{ControllerError, Result, SnapshotError};
use crate::meter::Meter;
use crate::ownership::{DatabaseHolder, DatabaseOwnership};
use crate::runtime::{FullNode, NodeSdk, SdkPaths};

/// Builds the per-run pipeline collaborators
pub trait SnapshotBackend: Send + Sync {
    fn downloader(
        &self,
        manifest_url: &str,
        dest_dir: &Path,
        node_database_version: u32,
    ) -> Box<dyn SnapshotDownloader>;

    fn installer(&self, archive: PathBuf, paths: &SdkPaths) -> Box<dyn SnapshotInstaller>;
}

/// HTTP downloads and tar archive installs
pub struct HttpSnapshotBackend {
    client: Client,
    retries: u32,
    retry_backoff: Duration,
}

impl HttpSnapshotBackend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retries: DOWNLOAD_RETRIES,
            retry_backoff: RETRY_BACKOFF,
        }
    }

    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.retry_backoff = backoff;
        self
    }
}

impl SnapshotBackend for HttpSnapshotBackend {
    fn downloader(
        &self,
        manifest_url: &str,
        dest_dir: &Path,
        node_database_version: u32,
    ) -> Box<dyn SnapshotDownloader> {
        Box::new(
            HttpSnapshotDownloader::new(
                self.client.clone(),
                manifest_url,
                dest_dir,
                node_database_version,
            )
            .with_retries(self.retries, self.retry_backoff),
        )
    }

    fn installer(&self, archive: PathBuf, paths: &SdkPaths) -> Box<dyn SnapshotInstaller> {
        Box::new(ArchiveInstaller::new(
            archive,
            paths.temp_dir.join(STAGING_DIR_NAME),
            &paths.chain_database_path,
        ))
    }
}

struct RunState {
    started: bool,
    result: Deferred<()>,
}

/// Runs the bootstrap pipeline at most once at a time
///
/// Callers that arrive while a run is in flight join it and receive the same
/// outcome. Once a run settles the result handle is re-armed for the next one.
pub struct SnapshotManager {
    backend: Arc<dyn SnapshotBackend>,
    manifests: ManifestDirectory,
    progress: ProgressHub,
    ownership: Arc<DatabaseOwnership>,
    state: Mutex<RunState>,
}

/// Re-arms the manager and settles the run, rejecting it with `Aborted` if
/// the task ends (or panics) before it settled
struct RunCompletion {
    manager: Arc<SnapshotManager>,
    result: Deferred<()>,
}

impl RunCompletion {
    fn settle(&self, outcome: Result<()>) {
        // Idle before waiters wake, so they can start the next run at once
        self.manager.rearm(&self.result);
        match outcome {
            Ok(()) => {
                info!("Snapshot run completed");
                self.result.resolve(());
            }
            Err(e) => {
                error!("Snapshot run failed: {}", e);
                self.result.reject(e);
            }
        }
    }
}

impl Drop for RunCompletion {
    fn drop(&mut self) {
        if !self.result.is_settled() {
            warn!("Snapshot run ended without settling its result");
            self.manager.rearm(&self.result);
            self.result.reject(SnapshotError::Aborted.into());
        }
    }
}

impl SnapshotManager {
    pub fn new(
        backend: Arc<dyn SnapshotBackend>,
        manifests: ManifestDirectory,
        ownership: Arc<DatabaseOwnership>,
    ) -> Self {
        Self {
            backend,
            manifests,
            progress: ProgressHub::new(),
            ownership,
            state: Mutex::new(RunState {
                started: false,
                result: Deferred::new(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Back to idle with a fresh handle, if `finished` is still the current one
    fn rearm(&self, finished: &Deferred<()>) {
        let mut state = self.lock_state();
        if state.result.same_epoch(finished) {
            state.started = false;
            state.result = Deferred::new();
        }
    }

    /// Start a run against `node`, or join the one already in flight
    pub fn run(self: &Arc<Self>, sdk: Arc<dyn NodeSdk>, node: Arc<dyn FullNode>) -> Deferred<()> {
        let mut state = self.lock_state();
        if state.started {
            debug!("Snapshot run already in flight, joining it");
            return state.result.clone();
        }
        state.started = true;
        let result = state.result.clone();
        drop(state);

        let completion = RunCompletion {
            manager: Arc::clone(self),
            result: result.clone(),
        };
        tokio::spawn(async move {
            let outcome = completion.manager.execute(sdk, node).await;
            completion.settle(outcome);
        });

        result
    }

    /// Handle for the in-flight run, or the one the next run will settle
    pub fn result(&self) -> Deferred<()> {
        self.lock_state().result.clone()
    }

    /// Handle for the in-flight run, if there is one
    pub fn in_flight(&self) -> Option<Deferred<()>> {
        let state = self.lock_state();
        state.started.then(|| state.result.clone())
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().started
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    pub fn watch_progress(&self) -> watch::Receiver<Option<ProgressEvent>> {
        self.progress.watch_latest()
    }

    pub fn latest_progress(&self) -> Option<ProgressEvent> {
        self.progress.latest()
    }

    #[instrument(skip_all)]
    async fn execute(&self, sdk: Arc<dyn NodeSdk>, node: Arc<dyn FullNode>) -> Result<()> {
        let _lease = self.ownership.acquire(DatabaseHolder::Installer).await;
        self.progress.clear();

        if !node.is_db_open() {
            recover_interrupted_swap(&sdk.paths().chain_database_path).await?;
            node.open_db()
                .await
                .map_err(|e| ControllerError::runtime("open database", e))?;
        }
        let node_database_version = node
            .database_version()
            .await
            .map_err(|e| ControllerError::runtime("read database version", e))?;
        node.close_db()
            .await
            .map_err(|e| ControllerError::runtime("close database", e))?;
        debug!("Node chain database version {}", node_database_version);

        let network_id = sdk.network_id();
        let manifest_url = network_id
            .and_then(|id| self.manifests.resolve(id))
            .ok_or_else(|| SnapshotError::ManifestUnavailable {
                network_id: network_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            })?;
        info!("Starting snapshot download from {}", manifest_url);

        let paths = sdk.paths();
        fs::create_dir_all(&paths.temp_dir)
            .await
            .map_err(|e| ControllerError::filesystem(&paths.temp_dir, e))?;

        let downloader =
            self.backend
                .downloader(manifest_url, &paths.temp_dir, node_database_version);
        let manifest = downloader.manifest().await?;

        let download_speed = Meter::new();
        download_speed.start();
        let total_bytes = manifest.file_size;
        let downloaded = downloader
            .download(&mut |prev: u64, curr: u64| {
                debug!("Download progress: {}/{}", curr, total_bytes);
                download_speed.add(curr.saturating_sub(prev));
                self.progress.emit(ProgressEvent::Download {
                    total_bytes,
                    curr_bytes: curr,
                    speed: download_speed.rate_1m(),
                });
            })
            .await;
        download_speed.stop();
        downloaded?;

        let archive = downloader
            .verify_checksum(true)
            .await?
            .ok_or_else(|| SnapshotError::ChecksumMismatch {
                expected: manifest.checksum.clone(),
            })?;

        let installer = self.backend.installer(archive, paths);

        let unzip_speed = Meter::new();
        unzip_speed.start();
        let unzipped = installer
            .unzip(&mut |total: u64, prev: u64, curr: u64| {
                debug!("Unzip progress: {}/{}", curr, total);
                unzip_speed.add(curr.saturating_sub(prev));
                self.progress.emit(ProgressEvent::Unzip {
                    total_entries: total,
                    curr_entries: curr,
                    speed: unzip_speed.rate_1m(),
                });
            })
            .await;
        unzip_speed.stop();
        unzipped?;

        installer.replace_database().await?;

        let archive = installer.archive_path();
        if let Err(e) = fs::remove_file(archive).await {
            warn!(
                "Failed to remove snapshot archive {}: {}",
                archive.display(),
                e
            );
        }

        node.open_db()
            .await
            .map_err(|e| ControllerError::runtime("reopen database", e))?;
        Ok(())
    }
}
