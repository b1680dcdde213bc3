//! Snapshot bootstrap pipeline
//!
//! A run fetches the manifest for the node's network, streams the archive
//! into the temp directory, verifies its SHA-256, extracts it into a staging
//! directory and swaps it in as the chain database. [`SnapshotManager`]
//! sequences the stages and publishes [`ProgressEvent`]s while they run.

pub mod downloader;
pub mod installer;
pub mod manager;
pub mod manifest;
pub mod progress;

pub use downloader::{sha256_file, DownloadProgress, HttpSnapshotDownloader, SnapshotDownloader};
pub use installer::{recover_interrupted_swap, ArchiveInstaller, SnapshotInstaller, UnzipProgress};
pub use manager::{HttpSnapshotBackend, SnapshotBackend, SnapshotManager};
pub use manifest::{ManifestDirectory, SnapshotManifest};
pub use progress::{ProgressEvent, ProgressHub};
