//! Store-wide configuration.
//!
//! Constructed once at `create_store`/`open_store` and threaded immutably
//! through the façade; individual components borrow only the fields they
//! need rather than the whole config.

use serde::{Deserialize, Serialize};

/// Tunables for a single store, all with sensible defaults.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Initial slot capacity for a freshly created store.
    pub initial_capacity: u32,
    /// Per-layer out-degree target for the proximity graph.
    pub graph_m: u32,
    /// Candidate frontier width used while inserting into the graph.
    pub graph_ef_construction: u32,
    /// Default candidate frontier width used while searching the graph.
    pub graph_ef_search: u32,
    /// Highest layer a node's level assignment may reach.
    pub max_level: u8,
    /// Growth multiplier applied to blob stores when they run out of room.
    pub blob_growth_factor: f64,
    /// Growth multiplier applied to the connection pool when it runs out of room.
    pub connection_growth_factor: f64,
    /// Prefer a copy-on-write reflink when snapshotting, falling back silently.
    pub snapshot_use_reflink: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 100_000,
            graph_m: 16,
            graph_ef_construction: 200,
            graph_ef_search: 50,
            max_level: 16,
            blob_growth_factor: 1.5,
            connection_growth_factor: 2.0,
            snapshot_use_reflink: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.initial_capacity, 100_000);
        assert_eq!(cfg.graph_m, 16);
        assert_eq!(cfg.graph_ef_construction, 200);
        assert_eq!(cfg.graph_ef_search, 50);
        assert_eq!(cfg.max_level, 16);
        assert!((cfg.blob_growth_factor - 1.5).abs() < f64::EPSILON);
        assert!((cfg.connection_growth_factor - 2.0).abs() < f64::EPSILON);
        assert!(cfg.snapshot_use_reflink);
    }
}
