//! # vecstore
//!
//! A persistent, memory-mapped associative vector store: nodes carry a
//! 384-dimensional embedding, an opaque payload, typed outgoing edges, and
//! tags, and are indexed for both approximate nearest-neighbor search (via
//! a quantized hierarchical proximity graph) and exact tag lookup.
//!
//! Every store is a directory of memory-mapped files plus a write-ahead
//! log; [`Store::create`] and [`Store::open`] are the two entry points,
//! and [`Store`] is the only type most callers need.
//!
//! ## Example
//!
//! ```rust,no_run
//! use vecstore::{Confidence, Node, NodeId, Store, StoreConfig};
//! use tempfile::tempdir;
//!
//! let dir = tempdir().unwrap();
//! let store = Store::create(dir.path(), StoreConfig::default()).unwrap();
//!
//! let mut embedding = vec![0.0f32; 384];
//! embedding[0] = 1.0;
//!
//! store.insert(Node {
//!     id: NodeId::from_u128(1),
//!     type_tag: 0,
//!     created_at: 0,
//!     accessed_at: 0,
//!     decay_rate: 0.0,
//!     confidence: Confidence::default(),
//!     embedding: embedding.clone(),
//!     payload_bytes: b"hello".to_vec(),
//!     edges: vec![],
//!     tags: vec!["greeting".into()],
//! }).unwrap();
//!
//! let hits = store.search(&embedding, 1).unwrap();
//! assert_eq!(hits[0].id, NodeId::from_u128(1));
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

/// Caller-facing data model: node identifiers, edges, confidence, nodes.
pub mod types;

/// Store-wide configuration.
pub mod config;

/// Memory-mapped file regions, the foundation every other component sits on.
pub mod mmap;

/// Append-only variable-length byte store for payloads and edge lists.
pub mod blob;

/// Variable-length per-node adjacency records for the proximity graph.
pub mod connection_pool;

/// Scalar, binary and locality-key quantization of embeddings.
pub mod quantization;

/// Proximity graph algorithms: level assignment, layer search, neighbor selection.
pub mod graph;

/// The central slot-addressed index binding every sibling file together.
pub mod unified;

/// Write-ahead log for crash durability and cross-process coordination.
pub mod wal;

/// Roaring-bitmap-backed inverted index from tag to node.
pub mod tags;

/// Point-in-time, copy-on-write store snapshots.
pub mod snapshot;

/// Crate-wide error type.
pub mod error;

/// The store façade: the entry point most callers use.
pub mod store;

pub use config::StoreConfig;
pub use error::StoreError;
pub use quantization::{BinaryQuantizer, BinaryVector, QuantizedVector};
pub use store::Store;
pub use types::{Confidence, Edge, Node, NodeId, SlotId, EMBEDDING_DIM};
pub use unified::SearchHit;

/// The crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version string.
///
/// # Example
///
/// ```rust
/// let version = vecstore::version();
/// assert!(!version.is_empty());
/// ```
#[must_use]
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_not_empty() {
        assert!(!version().is_empty());
    }
}
