use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::fs;
use tracing::debug;

use super::SettingsStore;

/// Settings persisted as a flat JSON object on disk
pub struct JsonSettingsStore {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl JsonSettingsStore {
    /// Load `path`, seeding keys from `defaults` that the file does not set
    pub async fn load(path: impl Into<PathBuf>, defaults: Map<String, Value>) -> Result<Self> {
        let path = path.into();
        let mut values = defaults;

        match fs::read_to_string(&path).await {
            Ok(content) => {
                let stored: Map<String, Value> = serde_json::from_str(&content)
                    .map_err(|e| anyhow!("Failed to parse settings {}: {}", path.display(), e))?;
                values.extend(stored);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {}, using defaults", path.display());
            }
            Err(e) => return Err(anyhow!("Failed to read settings {}: {}", path.display(), e)),
        }

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    /// Store with no values that will be written to `path` on save
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            values: RwLock::new(Map::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, Map<String, Value>> {
        self.values.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Map<String, Value>> {
        self.values.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.write().insert(key.to_string(), value);
    }

    async fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&*self.read())?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, content).await?;
        fs::rename(&tmp_path, &self.path).await?;
        debug!("Saved settings to {}", self.path.display());
        Ok(())
    }
}
