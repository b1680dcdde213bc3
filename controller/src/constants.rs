//! Central repository for constants shared across the controller
//!
//! Organised by category so timeouts, keys and table defaults have a single
//! source of truth.

use std::time::Duration;

/// Keys in the node runtime's persisted settings store
pub mod settings_keys {
    /// Numeric network identifier the node is configured for
    pub const NETWORK_ID: &str = "networkId";

    /// Hex-encoded secret key of the node's peer identity
    pub const NETWORK_IDENTITY: &str = "networkIdentity";

    /// Set until the first successful start has completed
    pub const IS_FIRST_RUN: &str = "isFirstRun";

    /// One-time telemetry identifier generated on first run
    pub const TELEMETRY_NODE_ID: &str = "telemetryNodeId";
}

/// Snapshot manifest lookup table defaults
pub mod networks {
    pub const MAINNET_ID: u32 = 1;
    pub const TESTNET_ID: u32 = 0;

    pub const MAINNET_MANIFEST_URL: &str = "https://snapshots.ironfish.network/manifest.json";
    pub const TESTNET_MANIFEST_URL: &str =
        "https://testnet.snapshots.ironfish.network/manifest.json";
}

/// Snapshot pipeline constants
pub mod snapshot {
    use super::Duration;

    /// Default number of retries for a failed archive download
    pub const DOWNLOAD_RETRIES: u32 = 3;

    /// Base backoff between download retries (multiplied by the attempt number)
    pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

    /// Fallback archive name when the download URL has no usable path segment
    pub const DEFAULT_ARCHIVE_NAME: &str = "snapshot.tar.gz";

    /// Subdirectory of the temp dir that receives the extracted archive
    pub const STAGING_DIR_NAME: &str = "snapshot.staging";

    /// Buffer size used while hashing the downloaded archive
    pub const HASH_BUFFER_BYTES: usize = 1024 * 1024;

    /// Buffered progress events per subscriber before it starts lagging
    pub const PROGRESS_CHANNEL_CAPACITY: usize = 256;
}

/// Throughput meter constants
pub mod meter {
    use super::Duration;

    /// Interval at which moving rates are folded
    pub const TICK: Duration = Duration::from_secs(1);

    pub const WINDOW_1S: Duration = Duration::from_secs(1);
    pub const WINDOW_5S: Duration = Duration::from_secs(5);
    pub const WINDOW_1M: Duration = Duration::from_secs(60);
    pub const WINDOW_5M: Duration = Duration::from_secs(300);
}

/// On-disk layout of the process-backed node runtime
pub mod layout {
    pub const SETTINGS_FILE_NAME: &str = "internal.json";
    pub const HOST_FILE_NAME: &str = "hosts.json";
    pub const DATABASES_DIR_NAME: &str = "databases";
    pub const CHAIN_DIR_NAME: &str = "chain";
    pub const WALLET_DIR_NAME: &str = "wallet";
    pub const TEMP_DIR_NAME: &str = "temp";
    pub const VERSION_FILE_NAME: &str = "VERSION";
}

/// Default configuration values
pub mod defaults {
    /// Default agent port
    pub const AGENT_PORT: u16 = 8745;

    /// Default bind address for the agent
    pub const AGENT_HOST: &str = "0.0.0.0";

    /// Placeholder replaced with the data directory in node arguments
    pub const DATA_DIR_PLACEHOLDER: &str = "{data_dir}";
}
