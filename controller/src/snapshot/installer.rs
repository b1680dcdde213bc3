//! Archive extraction and database directory swap

use async_trait::async_trait;
use flate2::read::GzDecoder;
use std::ffi::OsString;
use std::fs::File;
use std::future::Future;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::SnapshotError;

/// Called with `(total_entries, previous_extracted, current_extracted)` after
/// every archive entry
pub type UnzipProgress<'a> = &'a mut (dyn FnMut(u64, u64, u64) + Send);

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[async_trait]
pub trait SnapshotInstaller: Send + Sync {
    fn archive_path(&self) -> &Path;

    /// Decompress the archive into the staging directory
    async fn unzip(&self, on_progress: UnzipProgress<'_>) -> Result<(), SnapshotError>;

    /// Swap the chain database directory for the staged one. On failure the
    /// previous database is left in place.
    async fn replace_database(&self) -> Result<(), SnapshotError>;
}

/// Installer for gzip-compressed (or plain) tar archives
pub struct ArchiveInstaller {
    archive: PathBuf,
    staging_dir: PathBuf,
    chain_database_path: PathBuf,
}

impl ArchiveInstaller {
    pub fn new(
        archive: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
        chain_database_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            archive: archive.into(),
            staging_dir: staging_dir.into(),
            chain_database_path: chain_database_path.into(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Directory that will become the chain database
    ///
    /// An archive that wraps its contents in a directory named after the
    /// chain database installs that directory, otherwise the staging root.
    pub async fn staged_database_path(&self) -> PathBuf {
        if let Some(name) = self.chain_database_path.file_name() {
            let nested = self.staging_dir.join(name);
            if fs::metadata(&nested).await.map(|m| m.is_dir()).unwrap_or(false) {
                return nested;
            }
        }
        self.staging_dir.clone()
    }
}

#[async_trait]
impl SnapshotInstaller for ArchiveInstaller {
    fn archive_path(&self) -> &Path {
        &self.archive
    }

    #[instrument(skip_all, fields(archive = %self.archive.display()))]
    async fn unzip(&self, on_progress: UnzipProgress<'_>) -> Result<(), SnapshotError> {
        if self.archive.starts_with(&self.staging_dir) {
            return Err(SnapshotError::Install {
                path: self.staging_dir.clone(),
                reason: format!(
                    "staging directory overlaps the archive {}",
                    self.archive.display()
                ),
            });
        }
        if fs::metadata(&self.staging_dir).await.is_ok() {
            debug!("Removing stale staging directory {}", self.staging_dir.display());
            fs::remove_dir_all(&self.staging_dir)
                .await
                .map_err(|e| SnapshotError::filesystem(&self.staging_dir, e))?;
        }
        fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|e| SnapshotError::filesystem(&self.staging_dir, e))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let archive = self.archive.clone();
        let staging = self.staging_dir.clone();
        let extraction = tokio::task::spawn_blocking(move || {
            extract(&archive, &staging, |total, prev, curr| {
                let _ = tx.send((total, prev, curr));
            })
        });

        while let Some((total, prev, curr)) = rx.recv().await {
            on_progress(total, prev, curr);
        }

        let extracted = extraction.await.map_err(|e| SnapshotError::Decompress {
            path: self.archive.clone(),
            reason: format!("extraction task failed: {}", e),
        })??;

        info!(
            "Extracted {} entries into {}",
            extracted,
            self.staging_dir.display()
        );
        Ok(())
    }

    #[instrument(skip(self), fields(target = %self.chain_database_path.display()))]
    async fn replace_database(&self) -> Result<(), SnapshotError> {
        let staged = self.staged_database_path().await;
        swap_directories(&staged, &self.chain_database_path, |from, to| fs::rename(from, to))
            .await?;

        if staged != self.staging_dir {
            if let Err(e) = fs::remove_dir_all(&self.staging_dir).await {
                warn!(
                    "Failed to remove staging directory {}: {}",
                    self.staging_dir.display(),
                    e
                );
            }
        }
        Ok(())
    }
}

fn open_archive(path: &Path) -> io::Result<Box<dyn Read>> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    let is_gzip = file.read_exact(&mut magic).is_ok() && magic == GZIP_MAGIC;
    file.seek(SeekFrom::Start(0))?;

    let reader = BufReader::new(file);
    if is_gzip {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Count entries, then unpack them. Returns the number extracted.
fn extract(
    archive_path: &Path,
    staging: &Path,
    mut on_entry: impl FnMut(u64, u64, u64),
) -> Result<u64, SnapshotError> {
    let corrupt = |reason: String| SnapshotError::Decompress {
        path: archive_path.to_path_buf(),
        reason,
    };

    let total = {
        let reader = open_archive(archive_path).map_err(|e| corrupt(e.to_string()))?;
        let mut archive = tar::Archive::new(reader);
        let mut count = 0u64;
        for entry in archive.entries().map_err(|e| corrupt(e.to_string()))? {
            entry.map_err(|e| corrupt(e.to_string()))?;
            count += 1;
        }
        count
    };
    debug!("Archive {} holds {} entries", archive_path.display(), total);

    let reader = open_archive(archive_path).map_err(|e| corrupt(e.to_string()))?;
    let mut archive = tar::Archive::new(reader);
    let mut current = 0u64;
    for entry in archive.entries().map_err(|e| corrupt(e.to_string()))? {
        let mut entry = entry.map_err(|e| corrupt(e.to_string()))?;
        let entry_path = entry
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let unpacked = entry
            .unpack_in(staging)
            .map_err(|e| corrupt(format!("{}: {}", entry_path, e)))?;
        if !unpacked {
            return Err(corrupt(format!(
                "entry '{}' escapes the staging directory",
                entry_path
            )));
        }

        let previous = current;
        current += 1;
        on_entry(total, previous, current);
    }

    Ok(current)
}

fn backup_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("database"));
    name.push(".previous");
    target.with_file_name(name)
}

/// Puts the database back if an earlier swap died after moving it aside.
///
/// Returns `true` when the backup was moved back into place. Must run before
/// any node opens the database at `target`.
#[instrument]
pub async fn recover_interrupted_swap(target: &Path) -> Result<bool, SnapshotError> {
    restore_backup(target, &backup_path(target), &|from: PathBuf, to: PathBuf| {
        fs::rename(from, to)
    })
    .await
}

async fn restore_backup<F, Fut>(
    target: &Path,
    backup: &Path,
    rename: &F,
) -> Result<bool, SnapshotError>
where
    F: Fn(PathBuf, PathBuf) -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if fs::metadata(target).await.is_ok() || fs::metadata(backup).await.is_err() {
        return Ok(false);
    }

    warn!(
        "Database missing at {}, restoring it from {}",
        target.display(),
        backup.display()
    );
    rename(backup.to_path_buf(), target.to_path_buf())
        .await
        .map_err(|e| SnapshotError::Install {
            path: target.to_path_buf(),
            reason: format!("failed to restore database from {}: {}", backup.display(), e),
        })?;
    Ok(true)
}

/// Move `staged` onto `target`, keeping the old directory as a backup until
/// the new one is in place
pub(crate) async fn swap_directories<F, Fut>(
    staged: &Path,
    target: &Path,
    rename: F,
) -> Result<(), SnapshotError>
where
    F: Fn(PathBuf, PathBuf) -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    let install_error = |reason: String| SnapshotError::Install {
        path: target.to_path_buf(),
        reason,
    };

    match fs::metadata(staged).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(install_error(format!(
                "staged database {} is not a directory",
                staged.display()
            )))
        }
        Err(e) => {
            return Err(install_error(format!(
                "staged database {} is missing: {}",
                staged.display(),
                e
            )))
        }
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| SnapshotError::filesystem(parent, e))?;
    }

    let backup = backup_path(target);
    restore_backup(target, &backup, &rename).await?;
    if fs::metadata(&backup).await.is_ok() {
        // Only reached with the target in place, so the backup is stale
        debug!("Removing stale database backup {}", backup.display());
        fs::remove_dir_all(&backup)
            .await
            .map_err(|e| SnapshotError::filesystem(&backup, e))?;
    }

    let had_existing = fs::metadata(target).await.is_ok();
    if had_existing {
        rename(target.to_path_buf(), backup.clone())
            .await
            .map_err(|e| install_error(format!("failed to move current database aside: {}", e)))?;
    }

    if let Err(e) = rename(staged.to_path_buf(), target.to_path_buf()).await {
        if had_existing {
            if let Err(restore) = rename(backup.clone(), target.to_path_buf()).await {
                error!(
                    "Failed to restore database from {}: {}",
                    backup.display(),
                    restore
                );
            }
        }
        return Err(install_error(format!(
            "failed to move staged database into place: {}",
            e
        )));
    }

    if had_existing {
        if let Err(e) = fs::remove_dir_all(&backup).await {
            warn!("Failed to remove database backup {}: {}", backup.display(), e);
        }
    }

    info!("Installed snapshot database at {}", target.display());
    Ok(())
}
