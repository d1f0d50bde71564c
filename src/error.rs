//! Crate-wide error type composing every component's error enum.
//!
//! Each storage component (mmap, blob store, connection pool, WAL, tag
//! index, unified index) defines its own `thiserror` enum; [`StoreError`]
//! is the facade-level union callers actually see.

use crate::connection_pool::ConnectionPoolError;
use crate::mmap::MmapError;
use crate::snapshot::SnapshotError;
use crate::tags::TagError;
use crate::unified::IndexError;
use crate::wal::WalError;
use thiserror::Error;

/// The top-level error type returned by the store façade.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A mapped-region failure surfaced directly (outside a component).
    #[error(transparent)]
    Mmap(#[from] MmapError),

    /// A connection pool failure surfaced directly.
    #[error(transparent)]
    ConnectionPool(#[from] ConnectionPoolError),

    /// A write-ahead log failure.
    #[error(transparent)]
    Wal(#[from] WalError),

    /// A unified index failure (covers blob store and mmap errors too).
    #[error(transparent)]
    Index(#[from] IndexError),

    /// A tag index failure.
    #[error(transparent)]
    Tag(#[from] TagError),

    /// A snapshot failure.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// The store directory already contains a store (on `create_store`).
    #[error("store already exists at {0}")]
    AlreadyExists(std::path::PathBuf),

    /// A plain I/O failure not already wrapped by a component error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
