//! Filesystem helpers: output delivery and best-effort cleanup.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// EXDEV on Linux and macOS.
const CROSS_DEVICE_ERRNO: i32 = 18;

/// Move `src` to `dst`, creating parent directories. Falls back to
/// copy-then-rename when the paths are on different filesystems.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<PathBuf> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if !src.is_file() {
        return Err(MediaError::FileNotFound(src.to_path_buf()));
    }
    ensure_parent(dst).await?;

    match fs::rename(src, dst).await {
        Ok(()) => Ok(dst.to_path_buf()),
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE_ERRNO) => {
            debug!(
                src = %src.display(),
                dst = %dst.display(),
                "Cross-device rename, copying instead"
            );
            copy_across_devices(src, dst).await?;
            Ok(dst.to_path_buf())
        }
        Err(e) => Err(e.into()),
    }
}

async fn ensure_parent(path: &Path) -> MediaResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Copy next to `dst`, rename into place, then drop the source.
async fn copy_across_devices(src: &Path, dst: &Path) -> MediaResult<()> {
    let staging = dst.with_extension("partial");

    if let Err(e) = fs::copy(src, &staging).await {
        remove_file_best_effort(&staging).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&staging, dst).await {
        remove_file_best_effort(&staging).await;
        return Err(e.into());
    }

    remove_file_best_effort(src).await;
    Ok(())
}

/// Size of a file in bytes, or 0 when it cannot be read.
pub async fn file_size(path: impl AsRef<Path>) -> u64 {
    fs::metadata(path.as_ref())
        .await
        .map(|m| m.len())
        .unwrap_or(0)
}

/// Remove a file; failures are logged and otherwise ignored.
pub async fn remove_file_best_effort(path: impl AsRef<Path>) {
    let path = path.as_ref();
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

/// Remove a directory tree; failures are logged and otherwise ignored.
pub async fn remove_dir_best_effort(path: impl AsRef<Path>) {
    let path = path.as_ref();
    match fs::remove_dir_all(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed work directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove work directory"),
    }
}
