//! In-memory node runtime
//!
//! Every call that would touch the node or its database is appended to a
//! shared [`Journal`], so tests can assert on ordering and on the absence of
//! side effects.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use controller::runtime::process::sdk_paths;
use controller::runtime::{
    ControlClient, FullNode, NodeOptions, NodeRuntime, NodeSdk, SdkOptions, SdkPaths,
    SettingsStore,
};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Ordered record of runtime calls
#[derive(Default)]
pub struct Journal {
    events: Mutex<Vec<String>>,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    /// Index of the first occurrence of `event`
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    /// Index of the last occurrence of `event`
    pub fn last_position(&self, event: &str) -> Option<usize> {
        self.events().iter().rposition(|e| e == event)
    }
}

/// Settings kept in memory, shared across epochs like a file on disk
#[derive(Default)]
pub struct MemorySettings {
    values: RwLock<Map<String, Value>>,
    saves: AtomicUsize,
}

impl MemorySettings {
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.values.write().unwrap().insert(key.to_string(), value);
    }

    async fn save(&self) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockRuntime {
    pub journal: Arc<Journal>,
    pub settings: Arc<MemorySettings>,
    pub fail_init: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_shutdown: AtomicBool,
    pub database_version: AtomicU32,
}

impl MockRuntime {
    pub fn new(journal: Arc<Journal>, network_id: Option<u32>) -> Arc<Self> {
        let settings = Arc::new(MemorySettings::default());
        if let Some(id) = network_id {
            settings.set("networkId", json!(id));
        }
        settings.set("isFirstRun", json!(true));

        Arc::new(Self {
            journal,
            settings,
            fail_init: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_shutdown: AtomicBool::new(false),
            database_version: AtomicU32::new(3),
        })
    }
}

#[async_trait]
impl NodeRuntime for MockRuntime {
    async fn init(&self, options: SdkOptions) -> Result<Arc<dyn NodeSdk>> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(anyhow!("runtime refused to initialize"));
        }
        self.journal.push("sdk:init");

        Ok(Arc::new(MockSdk {
            journal: self.journal.clone(),
            paths: sdk_paths(&options.data_dir),
            settings: self.settings.clone(),
            fail_start: self.fail_start.load(Ordering::SeqCst),
            fail_shutdown: self.fail_shutdown.load(Ordering::SeqCst),
            database_version: self.database_version.load(Ordering::SeqCst),
        }))
    }
}

pub struct MockSdk {
    journal: Arc<Journal>,
    paths: SdkPaths,
    settings: Arc<MemorySettings>,
    fail_start: bool,
    fail_shutdown: bool,
    database_version: u32,
}

#[async_trait]
impl NodeSdk for MockSdk {
    fn paths(&self) -> &SdkPaths {
        &self.paths
    }

    fn internal(&self) -> Arc<dyn SettingsStore> {
        self.settings.clone()
    }

    async fn node(&self, _options: NodeOptions) -> Result<Arc<dyn FullNode>> {
        self.journal.push("sdk:node");
        Ok(Arc::new(MockNode {
            journal: self.journal.clone(),
            settings: self.settings.clone(),
            db_open: AtomicBool::new(false),
            fail_start: self.fail_start,
            fail_shutdown: self.fail_shutdown,
            database_version: self.database_version,
        }))
    }
}

pub struct MockNode {
    journal: Arc<Journal>,
    settings: Arc<MemorySettings>,
    db_open: AtomicBool,
    fail_start: bool,
    fail_shutdown: bool,
    database_version: u32,
}

#[async_trait]
impl FullNode for MockNode {
    fn is_db_open(&self) -> bool {
        self.db_open.load(Ordering::SeqCst)
    }

    async fn open_db(&self) -> Result<()> {
        self.journal.push("node:open_db");
        self.db_open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close_db(&self) -> Result<()> {
        self.journal.push("node:close_db");
        self.db_open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn database_version(&self) -> Result<u32> {
        Ok(self.database_version)
    }

    async fn wait_for_open(&self) -> Result<()> {
        self.journal.push("node:wait_for_open");
        self.db_open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        if self.fail_start {
            self.journal.push("node:start_failed");
            return Err(anyhow!("node refused to start"));
        }
        self.journal.push("node:start");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if self.fail_shutdown {
            self.journal.push("node:shutdown_failed");
            return Err(anyhow!("node did not shut down"));
        }
        self.journal.push("node:shutdown");
        Ok(())
    }

    async fn reset_wallet(&self) -> Result<()> {
        if !self.is_db_open() {
            return Err(anyhow!("database is closed"));
        }
        self.journal.push("node:reset_wallet");
        Ok(())
    }

    fn network_secret_key(&self) -> Vec<u8> {
        vec![0xab; 32]
    }

    fn settings(&self) -> Arc<dyn SettingsStore> {
        self.settings.clone()
    }

    fn control_client(&self) -> Arc<dyn ControlClient> {
        Arc::new(EchoClient)
    }
}

/// Control client that echoes the route and params back
pub struct EchoClient;

#[async_trait]
impl ControlClient for EchoClient {
    async fn request(&self, route: &str, params: Value) -> Result<Value> {
        Ok(json!({ "route": route, "params": params }))
    }
}
