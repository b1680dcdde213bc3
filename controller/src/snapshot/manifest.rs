use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants::networks;
use crate::errors::SnapshotError;

/// Metadata describing the latest published snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub file_size: u64,
    pub checksum: String,
    pub database_version: u32,
    pub download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_sequence: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl SnapshotManifest {
    /// Parse and sanity-check a manifest document fetched from `url`
    pub fn parse(url: &str, body: &str) -> Result<Self, SnapshotError> {
        let manifest: SnapshotManifest =
            serde_json::from_str(body).map_err(|e| SnapshotError::Manifest {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if manifest.checksum.is_empty()
            || !manifest.checksum.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(SnapshotError::Manifest {
                url: url.to_string(),
                reason: format!("checksum '{}' is not a hex string", manifest.checksum),
            });
        }
        if manifest.download_url.trim().is_empty() {
            return Err(SnapshotError::Manifest {
                url: url.to_string(),
                reason: "download_url is empty".to_string(),
            });
        }

        Ok(manifest)
    }

    /// Archive file name taken from the last path segment of the download URL
    pub fn file_name(&self) -> Option<&str> {
        let without_query = self.download_url.split(['?', '#']).next()?;
        without_query
            .rsplit('/')
            .next()
            .filter(|segment| !matches!(*segment, "" | "." | ".."))
    }
}

/// Network id to manifest URL lookup table
#[derive(Debug, Clone)]
pub struct ManifestDirectory {
    urls: HashMap<u32, String>,
}

impl Default for ManifestDirectory {
    fn default() -> Self {
        let mut urls = HashMap::new();
        urls.insert(networks::MAINNET_ID, networks::MAINNET_MANIFEST_URL.to_string());
        urls.insert(networks::TESTNET_ID, networks::TESTNET_MANIFEST_URL.to_string());
        Self { urls }
    }
}

impl ManifestDirectory {
    /// Built-in table with `overrides` replacing or extending entries
    pub fn with_overrides(overrides: &HashMap<u32, String>) -> Self {
        let mut directory = Self::default();
        for (network_id, url) in overrides {
            directory.urls.insert(*network_id, url.clone());
        }
        directory
    }

    pub fn empty() -> Self {
        Self {
            urls: HashMap::new(),
        }
    }

    pub fn resolve(&self, network_id: u32) -> Option<&str> {
        self.urls.get(&network_id).map(String::as_str)
    }
}
