//! Lifecycle controller for a blockchain full node with snapshot bootstrap

pub mod config;
pub mod constants;
pub mod deferred;
pub mod errors;
pub mod lifecycle;
pub mod meter;
pub mod ownership;
pub mod runtime;
pub mod snapshot;

pub use config::{Config, ConfigManager};
pub use deferred::Deferred;
pub use errors::{ConfigError, ControllerError, Result, SnapshotError};
pub use lifecycle::{LifecycleState, NodeController};
pub use meter::Meter;
pub use ownership::{DatabaseHolder, DatabaseLease, DatabaseOwnership};
pub use snapshot::{ProgressEvent, SnapshotManager};
