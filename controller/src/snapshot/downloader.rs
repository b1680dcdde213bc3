//! Manifest fetch, streamed archive download and checksum verification

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use super::manifest::SnapshotManifest;
use crate::constants::snapshot::{DEFAULT_ARCHIVE_NAME, HASH_BUFFER_BYTES};
use crate::errors::SnapshotError;

/// Called with `(previous_bytes, current_bytes)` at every chunk boundary
pub type DownloadProgress<'a> = &'a mut (dyn FnMut(u64, u64) + Send);

#[async_trait]
pub trait SnapshotDownloader: Send + Sync {
    /// Manifest for this run, fetched on first use
    async fn manifest(&self) -> Result<SnapshotManifest, SnapshotError>;

    /// Stream the archive into the destination directory. A partial file is
    /// left on disk when this fails.
    async fn download(&self, on_progress: DownloadProgress<'_>) -> Result<(), SnapshotError>;

    /// Hash the downloaded file. `Ok(None)` means the checksum did not match;
    /// with `cleanup` the file is deleted in that case.
    async fn verify_checksum(&self, cleanup: bool) -> Result<Option<PathBuf>, SnapshotError>;
}

pub struct HttpSnapshotDownloader {
    client: Client,
    manifest_url: String,
    dest_dir: PathBuf,
    node_database_version: u32,
    retries: u32,
    retry_backoff: Duration,
    manifest: OnceCell<SnapshotManifest>,
}

impl HttpSnapshotDownloader {
    pub fn new(
        client: Client,
        manifest_url: impl Into<String>,
        dest_dir: impl Into<PathBuf>,
        node_database_version: u32,
    ) -> Self {
        Self {
            client,
            manifest_url: manifest_url.into(),
            dest_dir: dest_dir.into(),
            node_database_version,
            retries: 0,
            retry_backoff: Duration::ZERO,
            manifest: OnceCell::new(),
        }
    }

    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.retry_backoff = backoff;
        self
    }

    /// Where the archive lands for a given manifest
    pub fn file_path(&self, manifest: &SnapshotManifest) -> PathBuf {
        self.dest_dir
            .join(manifest.file_name().unwrap_or(DEFAULT_ARCHIVE_NAME))
    }

    async fn fetch_manifest(&self) -> Result<SnapshotManifest, SnapshotError> {
        debug!("Fetching snapshot manifest from {}", self.manifest_url);

        let network_error = |reason: String| SnapshotError::Network {
            url: self.manifest_url.clone(),
            reason,
        };

        let response = self
            .client
            .get(&self.manifest_url)
            .send()
            .await
            .map_err(|e| network_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(network_error(format!("HTTP {}", response.status())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| network_error(e.to_string()))?;
        let manifest = SnapshotManifest::parse(&self.manifest_url, &body)?;

        if manifest.database_version > self.node_database_version {
            return Err(SnapshotError::IncompatibleVersion {
                snapshot: manifest.database_version,
                node: self.node_database_version,
            });
        }

        info!(
            "Snapshot manifest: {} bytes, database version {}, sequence {:?}",
            manifest.file_size, manifest.database_version, manifest.block_sequence
        );
        Ok(manifest)
    }

    async fn existing_len(path: &Path) -> u64 {
        fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
    }

    /// One download attempt, resuming from whatever is already on disk
    async fn download_once(
        &self,
        manifest: &SnapshotManifest,
        path: &Path,
        on_progress: DownloadProgress<'_>,
    ) -> Result<(), SnapshotError> {
        let mut existing = Self::existing_len(path).await;
        if existing > manifest.file_size {
            warn!(
                "Discarding oversized partial download {} ({} > {} bytes)",
                path.display(),
                existing,
                manifest.file_size
            );
            fs::remove_file(path)
                .await
                .map_err(|e| SnapshotError::filesystem(path, e))?;
            existing = 0;
        }

        if existing == manifest.file_size && existing > 0 {
            info!("Snapshot already downloaded at {}", path.display());
            on_progress(existing, existing);
            return Ok(());
        }

        let mut request = self.client.get(&manifest.download_url);
        if existing > 0 {
            info!("Resuming snapshot download from byte {}", existing);
            request = request.header(header::RANGE, format!("bytes={}-", existing));
        }

        let response = request.send().await.map_err(|e| SnapshotError::Download {
            reason: format!("request to {} failed: {}", manifest.download_url, e),
        })?;

        let append = match response.status() {
            StatusCode::PARTIAL_CONTENT if existing > 0 => true,
            status if status.is_success() => {
                if existing > 0 {
                    debug!("Server ignored range request, restarting download");
                }
                existing = 0;
                false
            }
            status => {
                return Err(SnapshotError::Download {
                    reason: format!("{} returned HTTP {}", manifest.download_url, status),
                })
            }
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .await
            .map_err(|e| SnapshotError::filesystem(path, e))?;

        if existing > 0 {
            on_progress(existing, existing);
        }

        let mut current = existing;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SnapshotError::Download {
                reason: format!("stream interrupted at byte {}: {}", current, e),
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|e| SnapshotError::filesystem(path, e))?;

            let previous = current;
            current += chunk.len() as u64;
            on_progress(previous, current);
        }

        file.flush()
            .await
            .map_err(|e| SnapshotError::filesystem(path, e))?;

        if current != manifest.file_size {
            return Err(SnapshotError::Download {
                reason: format!(
                    "received {} of {} bytes",
                    current, manifest.file_size
                ),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl SnapshotDownloader for HttpSnapshotDownloader {
    async fn manifest(&self) -> Result<SnapshotManifest, SnapshotError> {
        self.manifest
            .get_or_try_init(|| self.fetch_manifest())
            .await
            .cloned()
    }

    #[instrument(skip_all, fields(dest = %self.dest_dir.display()))]
    async fn download(&self, on_progress: DownloadProgress<'_>) -> Result<(), SnapshotError> {
        let manifest = self.manifest().await?;
        fs::create_dir_all(&self.dest_dir)
            .await
            .map_err(|e| SnapshotError::filesystem(&self.dest_dir, e))?;
        let path = self.file_path(&manifest);

        let mut attempt = 0;
        loop {
            match self.download_once(&manifest, &path, &mut *on_progress).await {
                Ok(()) => {
                    info!("Snapshot downloaded to {}", path.display());
                    return Ok(());
                }
                Err(e) if attempt < self.retries && matches!(e, SnapshotError::Download { .. }) => {
                    attempt += 1;
                    warn!(
                        "Snapshot download failed: {} (retry {}/{})",
                        e, attempt, self.retries
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[instrument(skip(self))]
    async fn verify_checksum(&self, cleanup: bool) -> Result<Option<PathBuf>, SnapshotError> {
        let manifest = self.manifest().await?;
        let path = self.file_path(&manifest);

        let actual = sha256_file(&path).await?;
        if actual.eq_ignore_ascii_case(&manifest.checksum) {
            info!("Snapshot checksum verified for {}", path.display());
            return Ok(Some(path));
        }

        warn!(
            "Snapshot checksum mismatch for {}: expected {}, got {}",
            path.display(),
            manifest.checksum,
            actual
        );
        if cleanup {
            fs::remove_file(&path)
                .await
                .map_err(|e| SnapshotError::filesystem(&path, e))?;
            debug!("Removed corrupt download {}", path.display());
        }
        Ok(None)
    }
}

/// Lowercase hex SHA-256 of a file's contents
pub async fn sha256_file(path: &Path) -> Result<String, SnapshotError> {
    let mut file = File::open(path)
        .await
        .map_err(|e| SnapshotError::filesystem(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_BYTES];

    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|e| SnapshotError::filesystem(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
