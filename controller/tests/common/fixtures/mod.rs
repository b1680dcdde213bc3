//! Reusable test utilities:
//! - In-memory node runtime that journals every call
//! - Scripted snapshot backend (downloader and installer)
//! - Mock manifest and archive server
//! - Archive builders and common test data

// Not every test binary uses every fixture
#![allow(dead_code)]
#![allow(unused_imports)]

pub mod mock_backend;
pub mod mock_runtime;
pub mod mock_snapshot_server;
pub mod test_data;

pub use mock_backend::MockBackend;
pub use mock_runtime::{Journal, MockRuntime};
pub use mock_snapshot_server::MockSnapshotServer;
pub use test_data::*;
