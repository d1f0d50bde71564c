//! Point-in-time snapshots: copy-on-write clones of a store's sibling files.
//!
//! A snapshot is just a directory holding a copy of every sibling file as
//! of the moment `create_snapshot` ran. `reflink-copy` is tried first so
//! the copy is instantaneous and shares pages with the original on
//! filesystems that support it (btrfs, XFS with reflink, APFS); it falls
//! back to a buffered copy everywhere else.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors returned by [`create_snapshot`].
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The destination directory already contains files.
    #[error("snapshot destination {0} is not empty")]
    DestinationNotEmpty(PathBuf),

    /// Underlying I/O failure.
    #[error("io error on {path}: {source}")]
    Io {
        /// Path the error occurred on.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> SnapshotError {
    SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Copies every regular file directly under `source_dir` into `dest_dir`,
/// preferring a reflink clone and falling back to a buffered copy per file.
///
/// # Errors
///
/// Returns [`SnapshotError::DestinationNotEmpty`] if `dest_dir` already has
/// entries, or [`SnapshotError::Io`] on any filesystem failure.
pub fn create_snapshot(source_dir: &Path, dest_dir: &Path, use_reflink: bool) -> Result<(), SnapshotError> {
    fs::create_dir_all(dest_dir).map_err(|e| io_err(dest_dir, e))?;
    if fs::read_dir(dest_dir)
        .map_err(|e| io_err(dest_dir, e))?
        .next()
        .is_some()
    {
        return Err(SnapshotError::DestinationNotEmpty(dest_dir.to_path_buf()));
    }

    for entry in fs::read_dir(source_dir).map_err(|e| io_err(source_dir, e))? {
        let entry = entry.map_err(|e| io_err(source_dir, e))?;
        let file_type = entry.file_type().map_err(|e| io_err(source_dir, e))?;
        if !file_type.is_file() {
            continue;
        }
        let src_path = entry.path();
        let dest_path = dest_dir.join(entry.file_name());
        copy_one(&src_path, &dest_path, use_reflink)?;
    }
    Ok(())
}

fn copy_one(src: &Path, dest: &Path, use_reflink: bool) -> Result<(), SnapshotError> {
    if use_reflink {
        match reflink_copy::reflink(src, dest) {
            Ok(()) => {
                log::debug!("snapshot: reflinked {}", src.display());
                return Ok(());
            }
            Err(err) => {
                log::debug!(
                    "snapshot: reflink failed for {} ({err}), falling back to buffered copy",
                    src.display()
                );
            }
        }
    }
    fs::copy(src, dest).map_err(|e| io_err(src, e))?;
    Ok(())
}
