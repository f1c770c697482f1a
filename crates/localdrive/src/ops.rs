//! Filesystem mutations and metadata lookups behind the HTTP handlers.
//!
//! Every mutation takes the per-path lock for the entries it touches, so two
//! requests racing on the same path are applied one after the other. Reads
//! never lock.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::AppState;
use crate::error::{DriveError, io_or_not_found};
use crate::listing::EntryKind;
use crate::paths::{relative_path, resolve_and_verify_path, validate_name};

/// Metadata for a single file or folder.
#[derive(Debug, Clone)]
pub struct EntryDetails {
    pub name: String,
    pub kind: EntryKind,
    /// File length, or the recursive sum of file lengths for a folder.
    pub size: u64,
    pub created: SystemTime,
    pub modified: SystemTime,
}

/// Create `name` inside `parent`. Existing folders are left alone.
pub async fn create_folder(
    state: &AppState,
    parent: &str,
    name: &str,
) -> Result<PathBuf, DriveError> {
    let name = validate_name(name)?;
    let parent_dir = resolve_and_verify_path(&state.root_dir, parent)?;
    let target = parent_dir.join(name);

    let _guard = state.locks.lock(&target).await;

    if fs::metadata(&target).await.is_ok_and(|m| m.is_dir()) {
        debug!("Folder already exists: {}", target.display());
        return Ok(target);
    }

    info!("Creating folder: {}", target.display());
    fs::create_dir_all(&target).await?;
    Ok(target)
}

/// Rename an entry in place; the new name stays in the same parent folder.
///
/// An existing destination is replaced or rejected by whatever the host
/// filesystem's rename does.
pub async fn rename_entry(
    state: &AppState,
    old_path: &str,
    new_name: &str,
) -> Result<PathBuf, DriveError> {
    let new_name = validate_name(new_name)?;
    let source = resolve_and_verify_path(&state.root_dir, old_path)?;

    if source == state.root_dir {
        return Err(DriveError::BadRequest(
            "Cannot rename the serving root".to_string(),
        ));
    }

    let parent = source.parent().ok_or(DriveError::PathEscape)?;
    let destination = parent.join(new_name);

    let _guards = state.locks.lock_pair(&source, &destination).await;

    fs::symlink_metadata(&source)
        .await
        .map_err(|e| io_or_not_found(e, old_path))?;

    if source == destination {
        debug!("Rename to the same name: {}", source.display());
        return Ok(destination);
    }

    info!("Renaming: {} -> {}", source.display(), destination.display());
    fs::rename(&source, &destination).await?;
    Ok(destination)
}

/// Delete a file, or a folder with everything inside it.
///
/// A failure halfway through a folder leaves whatever was already removed
/// removed.
pub async fn delete_entry(state: &AppState, path: &str) -> Result<(), DriveError> {
    let target = resolve_and_verify_path(&state.root_dir, path)?;

    if target == state.root_dir {
        warn!("Refusing to delete the serving root");
        return Err(DriveError::BadRequest(
            "Cannot delete the serving root".to_string(),
        ));
    }

    let _guard = state.locks.lock(&target).await;

    let metadata = fs::symlink_metadata(&target)
        .await
        .map_err(|e| io_or_not_found(e, path))?;

    info!("Deleting: {}", target.display());
    if metadata.is_dir() {
        fs::remove_dir_all(&target).await?;
    } else {
        fs::remove_file(&target).await?;
    }
    Ok(())
}

/// Look up name, kind, size and timestamps for an entry.
///
/// Folder sizes walk the whole subtree on every call.
pub async fn entry_details(state: &AppState, path: &str) -> Result<EntryDetails, DriveError> {
    let target = resolve_and_verify_path(&state.root_dir, path)?;
    let metadata = fs::metadata(&target)
        .await
        .map_err(|e| io_or_not_found(e, path))?;

    let modified = metadata.modified()?;
    let created = metadata.created().unwrap_or(modified);
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let (kind, size) = if metadata.is_dir() {
        let dir = target.clone();
        let size = tokio::task::spawn_blocking(move || directory_size(&dir))
            .await
            .map_err(|err| DriveError::Io(std::io::Error::other(err.to_string())))?;
        (EntryKind::Folder, size)
    } else {
        (EntryKind::File, metadata.len())
    };

    Ok(EntryDetails {
        name,
        kind,
        size,
        created,
        modified,
    })
}

/// Sum of the sizes of all regular files below `dir`.
pub fn directory_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

/// Format a byte count with decimal units ("1 Byte", "5 Bytes", "1.5 kB").
pub fn natural_size(bytes: u64) -> String {
    const UNITS: [&str; 8] = ["kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

    if bytes == 1 {
        return "1 Byte".to_string();
    }
    if bytes < 1000 {
        return format!("{} Bytes", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = UNITS[0];
    for candidate in UNITS {
        value /= 1000.0;
        unit = candidate;
        if value < 1000.0 {
            break;
        }
    }
    format!("{:.1} {}", value, unit)
}

static UPLOAD_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An upload being streamed into a hidden temp file under the serving root.
///
/// The temp name does not include the client's file name, so any name the
/// filesystem accepts as a destination can be uploaded. Dropping it without
/// [`PendingUpload::commit`] removes the temp file.
pub struct PendingUpload {
    temp_path: PathBuf,
    file: Option<fs::File>,
    written: u64,
    limit: Option<u64>,
}

impl PendingUpload {
    pub async fn create(root: &Path, limit: Option<u64>) -> Result<Self, DriveError> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let seq = UPLOAD_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_path = root.join(format!(".upload-{:016x}-{:08x}", nanos, seq));
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;

        Ok(Self {
            temp_path,
            file: Some(file),
            written: 0,
            limit,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), DriveError> {
        self.written = self.written.saturating_add(chunk.len() as u64);
        if let Some(limit) = self.limit {
            if self.written > limit {
                return Err(DriveError::PayloadTooLarge {
                    size: self.written,
                    limit,
                });
            }
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| DriveError::Io(std::io::Error::other("upload already closed")))?;
        file.write_all(chunk).await?;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Move the finished upload over `dir/file_name`, creating `dir` first.
    pub async fn commit(
        mut self,
        state: &AppState,
        dir: &Path,
        file_name: &str,
    ) -> Result<PathBuf, DriveError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }

        fs::create_dir_all(dir).await?;
        let destination = dir.join(file_name);

        let _guard = state.locks.lock(&destination).await;

        if fs::metadata(&destination).await.is_ok_and(|m| m.is_dir()) {
            return Err(DriveError::BadRequest(format!(
                "A folder named {} already exists",
                file_name
            )));
        }

        info!(
            "Upload stored: {} ({} bytes)",
            destination.display(),
            self.written
        );
        move_file(&self.temp_path, &destination).await?;
        self.temp_path = PathBuf::new();

        debug!(
            "Upload visible at {}",
            relative_path(&state.root_dir, &destination)
        );
        Ok(destination)
    }
}

/// Rename `from` onto `to`, copying when they sit on different filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to).await {
        Err(err) if err.kind() == ErrorKind::CrossesDevices => {
            debug!("{} is on another device, copying", to.display());
            copy_then_remove(from, to).await
        }
        result => result,
    }
}

async fn copy_then_remove(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Err(err) = fs::copy(from, to).await {
        let _ = fs::remove_file(to).await;
        return Err(err);
    }
    fs::remove_file(from).await
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if self.temp_path.as_os_str().is_empty() {
            return;
        }
        drop(self.file.take());
        if let Err(err) = std::fs::remove_file(&self.temp_path) {
            debug!(
                "Failed to remove temp upload {}: {}",
                self.temp_path.display(),
                err
            );
        }
    }
}
