use serde_json::{json, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::fs;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::state::LifecycleState;
use crate::constants::settings_keys;
use crate::deferred::Deferred;
use crate::errors::{ControllerError, Result};
use crate::ownership::{DatabaseHolder, DatabaseLease, DatabaseOwnership};
use crate::runtime::{ControlClient, FullNode, NodeOptions, NodeRuntime, NodeSdk, SdkOptions};
use crate::snapshot::{recover_interrupted_swap, ManifestDirectory, SnapshotBackend, SnapshotManager};

struct LiveNode {
    node: Arc<dyn FullNode>,
    _lease: DatabaseLease,
}

#[derive(Default)]
struct ControllerState {
    sdk: Option<Arc<dyn NodeSdk>>,
    /// Node created for a snapshot run before start
    pending_node: Option<Arc<dyn FullNode>>,
    live: Option<LiveNode>,
    start_requested: bool,
}

/// Owns the node's lifecycle and its snapshot bootstrap
///
/// Every operation takes the controller lock for its whole duration, so
/// operations never interleave. Callers that only need the runtime or the
/// control client wait on the published handles instead.
pub struct NodeController {
    runtime: Arc<dyn NodeRuntime>,
    data_dir: PathBuf,
    snapshots: Arc<SnapshotManager>,
    ownership: Arc<DatabaseOwnership>,
    inner: AsyncMutex<ControllerState>,
    status: watch::Sender<LifecycleState>,
    sdk_handle: Mutex<Deferred<Arc<dyn NodeSdk>>>,
    rpc_handle: Mutex<Deferred<Arc<dyn ControlClient>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl NodeController {
    pub fn new(
        runtime: Arc<dyn NodeRuntime>,
        data_dir: impl Into<PathBuf>,
        backend: Arc<dyn SnapshotBackend>,
        manifests: ManifestDirectory,
    ) -> Self {
        let ownership = Arc::new(DatabaseOwnership::new());
        let snapshots = Arc::new(SnapshotManager::new(backend, manifests, ownership.clone()));
        let (status, _) = watch::channel(LifecycleState::Uninitialized);

        Self {
            runtime,
            data_dir: data_dir.into(),
            snapshots,
            ownership,
            inner: AsyncMutex::new(ControllerState::default()),
            status,
            sdk_handle: Mutex::new(Deferred::new()),
            rpc_handle: Mutex::new(Deferred::new()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn state(&self) -> LifecycleState {
        *self.status.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.status.subscribe()
    }

    pub fn snapshot_manager(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    pub fn ownership(&self) -> &Arc<DatabaseOwnership> {
        &self.ownership
    }

    /// Wait for the runtime of the current epoch
    pub async fn sdk(&self) -> Result<Arc<dyn NodeSdk>> {
        let handle = lock(&self.sdk_handle).clone();
        handle.wait().await
    }

    /// Wait for the control client of the running node
    pub async fn rpc_client(&self) -> Result<Arc<dyn ControlClient>> {
        let handle = lock(&self.rpc_handle).clone();
        handle.wait().await
    }

    fn set_state(&self, state: LifecycleState) {
        let previous = self.status.send_replace(state);
        if previous != state {
            debug!("Lifecycle {} -> {}", previous, state);
        }
    }

    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<()> {
        let mut state = self.inner.lock().await;
        self.init_locked(&mut state).await
    }

    async fn init_locked(&self, state: &mut ControllerState) -> Result<()> {
        if state.sdk.is_some() {
            return Ok(());
        }

        info!("Initializing node runtime in {}", self.data_dir.display());
        self.set_state(LifecycleState::Initializing);

        let options = SdkOptions {
            data_dir: self.data_dir.clone(),
            database_migrate: true,
        };
        let sdk = match self.runtime.init(options).await {
            Ok(sdk) => sdk,
            Err(e) => {
                self.set_state(LifecycleState::Uninitialized);
                return Err(ControllerError::runtime("init", e));
            }
        };

        state.sdk = Some(sdk.clone());
        lock(&self.sdk_handle).resolve(sdk);
        self.set_state(LifecycleState::Initialized);
        Ok(())
    }

    /// Replace the chain database with the published snapshot
    ///
    /// Only allowed before `start()`. Concurrent calls join the same run.
    #[instrument(skip(self))]
    pub async fn download_snapshot(&self) -> Result<()> {
        let run = {
            let mut state = self.inner.lock().await;
            if state.start_requested || state.live.is_some() {
                return Err(ControllerError::invalid_state(
                    "Cannot download snapshot after node has started",
                ));
            }
            let sdk = state.sdk.clone().ok_or(ControllerError::NotInitialized)?;

            let node = match &state.pending_node {
                Some(node) => node.clone(),
                None => {
                    let node = create_node(sdk.as_ref()).await?;
                    state.pending_node = Some(node.clone());
                    node
                }
            };
            self.snapshots.run(sdk, node)
        };

        run.wait().await
    }

    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let mut state = self.inner.lock().await;
        self.start_locked(&mut state).await
    }

    async fn start_locked(&self, state: &mut ControllerState) -> Result<()> {
        if state.live.is_some() {
            debug!("Node already started");
            return Ok(());
        }
        let sdk = state.sdk.clone().ok_or(ControllerError::NotInitialized)?;

        state.start_requested = true;
        self.set_state(LifecycleState::Starting);

        match self.start_node(state, sdk).await {
            Ok(()) => {
                self.set_state(LifecycleState::Started);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to start node: {}", e);
                state.start_requested = false;
                self.set_state(LifecycleState::Initialized);
                Err(e)
            }
        }
    }

    async fn start_node(&self, state: &mut ControllerState, sdk: Arc<dyn NodeSdk>) -> Result<()> {
        if let Some(run) = self.snapshots.in_flight() {
            info!("Waiting for snapshot run to finish before starting");
            run.wait().await?;
        }

        info!("Starting node");
        let node = match state.pending_node.take() {
            Some(node) => node,
            None => create_node(sdk.as_ref()).await?,
        };

        let lease = self.ownership.acquire(DatabaseHolder::Node).await;
        recover_interrupted_swap(&sdk.paths().chain_database_path).await?;
        if let Err(e) = boot(node.as_ref()).await {
            if node.is_db_open() {
                if let Err(close) = node.close_db().await {
                    warn!("Failed to close database after failed start: {:#}", close);
                }
            }
            return Err(e);
        }

        let client = node.control_client();
        state.live = Some(LiveNode {
            node,
            _lease: lease,
        });
        lock(&self.rpc_handle).resolve(client);
        info!("Node started");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.inner.lock().await;
        self.stop_locked(&mut state).await
    }

    async fn stop_locked(&self, state: &mut ControllerState) -> Result<()> {
        if let Some(run) = self.snapshots.in_flight() {
            info!("Waiting for snapshot run to finish before stopping");
            if let Err(e) = run.wait().await {
                debug!("Snapshot run ended with error: {}", e);
            }
        }

        if state.sdk.is_none() && state.live.is_none() {
            return Ok(());
        }

        self.set_state(LifecycleState::Stopping);
        let mut outcome = Ok(());

        if let Some(live) = state.live.take() {
            info!("Stopping node");
            let shutdown = live
                .node
                .shutdown()
                .await
                .map_err(|e| ControllerError::runtime("shutdown", e));
            if let Err(e) = &shutdown {
                warn!("Node shutdown failed, closing database anyway: {}", e);
            }
            // The lease is held until the database is closed
            let closed = live
                .node
                .close_db()
                .await
                .map_err(|e| ControllerError::runtime("close database", e));
            outcome = shutdown.and(closed);
        }

        if let Some(node) = state.pending_node.take() {
            if node.is_db_open() {
                if let Err(e) = node.close_db().await {
                    warn!("Failed to close database of unstarted node: {:#}", e);
                }
            }
        }

        state.sdk = None;
        state.start_requested = false;
        self.rearm_handles();
        self.set_state(LifecycleState::Uninitialized);
        outcome
    }

    /// Fresh handles for the next epoch. Callers still waiting on the old
    /// ones are released with `Stopped`.
    fn rearm_handles(&self) {
        let sdk = std::mem::take(&mut *lock(&self.sdk_handle));
        sdk.reject(ControllerError::Stopped {
            what: "node runtime",
        });
        let rpc = std::mem::take(&mut *lock(&self.rpc_handle));
        rpc.reject(ControllerError::Stopped {
            what: "rpc client",
        });
    }

    #[instrument(skip(self))]
    pub async fn restart(&self) -> Result<()> {
        let mut state = self.inner.lock().await;
        self.stop_locked(&mut state).await?;
        self.init_locked(&mut state).await?;
        self.start_locked(&mut state).await
    }

    /// Delete the chain database and peer list, clear the wallet and start
    /// again from an empty chain
    #[instrument(skip(self))]
    pub async fn reset(&self) -> Result<()> {
        let mut state = self.inner.lock().await;
        let sdk = state.sdk.clone().ok_or(ControllerError::NotInitialized)?;
        let paths = sdk.paths().clone();
        drop(sdk);

        self.stop_locked(&mut state).await?;

        {
            let _lease = self.ownership.acquire(DatabaseHolder::Maintenance).await;
            info!("Deleting databases...");
            tokio::join!(
                remove_artifact(&paths.chain_database_path),
                remove_artifact(&paths.host_file_path)
            );
        }

        self.init_locked(&mut state).await?;
        let sdk = state.sdk.clone().ok_or(ControllerError::NotInitialized)?;

        {
            let _lease = self.ownership.acquire(DatabaseHolder::Maintenance).await;
            let node = sdk
                .node(NodeOptions::default())
                .await
                .map_err(|e| ControllerError::runtime("create node", e))?;
            clear_wallet(node.as_ref()).await?;
        }
        info!("Databases deleted successfully");

        self.start_locked(&mut state).await
    }
}

async fn create_node(sdk: &dyn NodeSdk) -> Result<Arc<dyn FullNode>> {
    sdk.node(NodeOptions {
        private_identity: sdk.private_identity(),
        auto_seed: true,
    })
    .await
    .map_err(|e| ControllerError::runtime("create node", e))
}

/// Open the node, persist its identity and first-run settings, then start it
async fn boot(node: &dyn FullNode) -> Result<()> {
    node.wait_for_open()
        .await
        .map_err(|e| ControllerError::runtime("open node", e))?;

    let internal = node.settings();
    internal.set(
        settings_keys::NETWORK_IDENTITY,
        json!(hex::encode(node.network_secret_key())),
    );
    internal
        .save()
        .await
        .map_err(|e| ControllerError::runtime("save settings", e))?;

    let first_run = internal
        .get(settings_keys::IS_FIRST_RUN)
        .and_then(|value| value.as_bool())
        .unwrap_or(false);
    if first_run {
        let telemetry_id = Uuid::new_v4().to_string();
        debug!("First run, telemetry node id {}", telemetry_id);
        internal.set(settings_keys::IS_FIRST_RUN, Value::Bool(false));
        internal.set(settings_keys::TELEMETRY_NODE_ID, json!(telemetry_id));
        internal
            .save()
            .await
            .map_err(|e| ControllerError::runtime("save settings", e))?;
    }

    node.start()
        .await
        .map_err(|e| ControllerError::runtime("start", e))
}

async fn clear_wallet(node: &dyn FullNode) -> Result<()> {
    node.open_db()
        .await
        .map_err(|e| ControllerError::runtime("open database", e))?;
    let reset = node
        .reset_wallet()
        .await
        .map_err(|e| ControllerError::runtime("reset wallet", e));
    let closed = node
        .close_db()
        .await
        .map_err(|e| ControllerError::runtime("close database", e));
    reset.and(closed)
}

/// Remove a file or directory. Failures are logged, not returned.
async fn remove_artifact(path: &Path) {
    let removed = match fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).await,
        Ok(_) => fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    match removed {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
