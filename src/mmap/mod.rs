//! Mapped Region: a single file-backed virtual memory window.
//!
//! Every other on-disk component (blob store, connection pool, unified
//! index, WAL) is built on top of one or more [`MappedRegion`] instances.
//! The region owns its file descriptor and mapping and exposes only
//! `create`/`open`/`resize`/`sync`/`close` plus byte-slice accessors.

use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors returned by [`MappedRegion`] operations.
#[derive(Debug, Error)]
pub enum MmapError {
    /// The target file already exists (exclusive create requested).
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    /// Underlying I/O error (open, truncate, extend, flush).
    #[error("io error on {path}: {source}")]
    Io {
        /// Path the error occurred on.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Requested offset/length falls outside the mapped region.
    #[error("out of bounds: offset {offset} + len {len} exceeds region size {size}")]
    OutOfBounds {
        /// Requested byte offset.
        offset: u64,
        /// Requested length.
        len: u64,
        /// Current region size.
        size: u64,
    },

    /// The region is open read-only and a mutable accessor was requested.
    #[error("region is read-only")]
    ReadOnly,
}

/// A single file-backed virtual memory window.
///
/// `resize` follows the same two-phase discipline the Unified Index uses for
/// `grow()`: the file is extended on disk first, a brand new mapping
/// is built from the extended file, and only then is it swapped in. A failed
/// `mmap` call during the second step leaves the previous mapping — still
/// valid, still the old size — untouched.
pub enum MappedRegion {
    /// A writable mapping backed by an open file.
    Writable {
        /// Backing file handle (kept open for resize/sync).
        file: File,
        /// Path, retained for diagnostics and error messages.
        path: PathBuf,
        /// The live mapping.
        mmap: MmapMut,
    },
    /// A read-only mapping.
    ReadOnly {
        /// Backing file handle.
        file: File,
        /// Path, retained for diagnostics.
        path: PathBuf,
        /// The live mapping.
        mmap: Mmap,
    },
}

impl MappedRegion {
    /// Exclusively creates a new file of `size` bytes and maps it read-write.
    ///
    /// # Errors
    ///
    /// Returns [`MmapError::AlreadyExists`] if `path` already exists, or
    /// [`MmapError::Io`] on any other I/O failure.
    pub fn create(path: &Path, size: u64) -> Result<Self, MmapError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::AlreadyExists {
                    MmapError::AlreadyExists(path.to_path_buf())
                } else {
                    MmapError::Io {
                        path: path.to_path_buf(),
                        source,
                    }
                }
            })?;
        file.set_len(size).map_err(|source| MmapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        // SAFETY: the file is exclusively owned by this call; no other
        // mapping of it exists yet.
        let mmap = unsafe { MmapOptions::new().map_mut(&file) }.map_err(|source| MmapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::Writable {
            file,
            path: path.to_path_buf(),
            mmap,
        })
    }

    /// Opens an existing file and maps it.
    ///
    /// # Errors
    ///
    /// Returns [`MmapError::Io`] if the file cannot be opened or mapped.
    pub fn open(path: &Path, read_only: bool) -> Result<Self, MmapError> {
        if read_only {
            let file = OpenOptions::new()
                .read(true)
                .open(path)
                .map_err(|source| MmapError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            // SAFETY: the mapping is read-only; concurrent external writers
            // are a caller-coordination concern.
            let mmap = unsafe { MmapOptions::new().map(&file) }.map_err(|source| MmapError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(Self::ReadOnly {
                file,
                path: path.to_path_buf(),
                mmap,
            })
        } else {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|source| MmapError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            // SAFETY: see module docs; writers coordinate via the façade's
            // reader-writer lock and the WAL flock.
            let mmap = unsafe { MmapOptions::new().map_mut(&file) }.map_err(|source| {
                MmapError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            Ok(Self::Writable {
                file,
                path: path.to_path_buf(),
                mmap,
            })
        }
    }

    /// Extends the backing file to `new_size` and rebuilds the mapping.
    ///
    /// Two-phase: the file is extended first (step 1), then a fresh mapping
    /// is constructed (step 2) and move-assigned over `self` (step 3). If
    /// step 2 fails, `self` is left completely unmodified — the file is
    /// larger than the mapping believes, which is harmless and is exactly
    /// the state `open()`'s self-repair path is built to detect.
    ///
    /// # Errors
    ///
    /// Returns [`MmapError::ReadOnly`] if this region is not writable, or
    /// [`MmapError::Io`] if extending the file or remapping fails.
    pub fn resize(&mut self, new_size: u64) -> Result<(), MmapError> {
        let (file, path) = match self {
            Self::Writable { file, path, .. } => (file, path.clone()),
            Self::ReadOnly { .. } => return Err(MmapError::ReadOnly),
        };

        file.set_len(new_size).map_err(|source| MmapError::Io {
            path: path.clone(),
            source,
        })?;
        file.sync_all().map_err(|source| MmapError::Io {
            path: path.clone(),
            source,
        })?;

        // SAFETY: `file` now backs `new_size` bytes; no other code holds a
        // reference into the old mapping past this call returning.
        let new_mmap = unsafe { MmapOptions::new().map_mut(&*file) }.map_err(|source| {
            MmapError::Io {
                path: path.clone(),
                source,
            }
        })?;

        if let Self::Writable { mmap, .. } = self {
            *mmap = new_mmap;
        }
        Ok(())
    }

    /// Flushes the mapping to disk (`msync` equivalent).
    ///
    /// # Errors
    ///
    /// Returns [`MmapError::Io`] if the flush fails.
    pub fn sync(&self) -> Result<(), MmapError> {
        match self {
            Self::Writable { mmap, path, .. } => mmap.flush().map_err(|source| MmapError::Io {
                path: path.clone(),
                source,
            }),
            Self::ReadOnly { .. } => Ok(()),
        }
    }

    /// Returns the current mapped size in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::Writable { mmap, .. } => mmap.len() as u64,
            Self::ReadOnly { mmap, .. } => mmap.len() as u64,
        }
    }

    /// Returns true if the mapping is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrows the full mapped region as an immutable byte slice.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Writable { mmap, .. } => mmap,
            Self::ReadOnly { mmap, .. } => mmap,
        }
    }

    /// Borrows the full mapped region as a mutable byte slice.
    ///
    /// # Errors
    ///
    /// Returns [`MmapError::ReadOnly`] if the region was opened read-only.
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8], MmapError> {
        match self {
            Self::Writable { mmap, .. } => Ok(mmap),
            Self::ReadOnly { .. } => Err(MmapError::ReadOnly),
        }
    }

    /// Returns a bounds-checked byte slice `[offset, offset+len)`.
    ///
    /// # Errors
    ///
    /// Returns [`MmapError::OutOfBounds`] if the range exceeds the mapping.
    pub fn slice_at(&self, offset: u64, len: u64) -> Result<&[u8], MmapError> {
        let size = self.len();
        let end = offset.checked_add(len).unwrap_or(u64::MAX);
        if end > size {
            return Err(MmapError::OutOfBounds { offset, len, size });
        }
        Ok(&self.as_slice()[offset as usize..end as usize])
    }

    /// The path this region maps.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Writable { path, .. } | Self::ReadOnly { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_resize_preserves_prefix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region.bin");
        let mut region = MappedRegion::create(&path, 64).unwrap();
        region.as_mut_slice().unwrap()[0..4].copy_from_slice(b"EVEC");

        region.resize(128).unwrap();
        assert_eq!(region.len(), 128);
        assert_eq!(&region.as_slice()[0..4], b"EVEC");
    }

    #[test]
    fn create_twice_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region.bin");
        let _first = MappedRegion::create(&path, 16).unwrap();
        let second = MappedRegion::create(&path, 16);
        assert!(matches!(second, Err(MmapError::AlreadyExists(_))));
    }

    #[test]
    fn out_of_bounds_slice_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region.bin");
        let region = MappedRegion::create(&path, 16).unwrap();
        assert!(matches!(
            region.slice_at(10, 10),
            Err(MmapError::OutOfBounds { .. })
        ));
    }
}
