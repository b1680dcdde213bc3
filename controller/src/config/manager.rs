use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

use super::Config;
use crate::errors::ConfigError;

pub const API_KEY_ENV: &str = "AGENT_API_KEY";
const DEV_API_KEY: &str = "dev-insecure-key";

pub struct ConfigManager {
    current_config: Arc<Config>,
}

impl ConfigManager {
    /// Load `main.toml` from `config_dir`
    pub async fn new(config_dir: impl AsRef<str>) -> Result<Self, ConfigError> {
        let path = format!("{}/main.toml", config_dir.as_ref());
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| ConfigError::LoadFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let config = Self::from_toml(&content, std::env::var(API_KEY_ENV).ok())?;
        info!(
            "Loaded config from {}: data dir {}, network {}",
            path,
            config.data_dir.display(),
            config.node.network_id
        );

        Ok(Self {
            current_config: Arc::new(config),
        })
    }

    /// Parse and validate a config document. `env_api_key` wins over the
    /// file's `api_key`.
    pub fn from_toml(content: &str, env_api_key: Option<String>) -> Result<Config, ConfigError> {
        let mut config: Config = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })?;
        config.validate()?;
        config.api_key = Some(resolve_api_key(config.api_key.take(), env_api_key));
        Ok(config)
    }

    pub fn get_current_config(&self) -> Arc<Config> {
        self.current_config.clone()
    }
}

fn resolve_api_key(file_key: Option<String>, env_key: Option<String>) -> String {
    let non_empty = |key: Option<String>| key.filter(|k| !k.trim().is_empty());

    if let Some(key) = non_empty(env_key) {
        return key;
    }
    if let Some(key) = non_empty(file_key) {
        return key;
    }
    warn!(
        "No API key configured (set api_key or {}), using the development key",
        API_KEY_ENV
    );
    DEV_API_KEY.to_string()
}
