//! Unified Index: the central structure binding the hot slot array, the
//! cold metadata array, the quantized vector array, the connection pool,
//! the blob store and the proximity graph into one coherent store.
//!
//! Three parallel, slot-indexed, fixed-size-record files make up the "hot"
//! path (`IndexedNode`), the "cold" path (`NodeMeta`) and the quantized
//! vectors; a slot's record in each lives at the same `slot * record_size`
//! offset, so no extra indirection table is needed between them.

use crate::blob::{BlobError, BlobStore};
use crate::connection_pool::{ConnectionPool, ConnectionPoolError, PoolEdge};
use crate::graph;
use crate::mmap::{MappedRegion, MmapError};
use crate::quantization::{self, quantized_cosine, BinaryQuantizer, BinaryVector, QuantizedVector, QUANTIZED_VECTOR_BYTES};
use crate::types::{Confidence, Edge, Node, NodeId, SlotId, EMBEDDING_DIM};
use bytemuck::{Pod, Zeroable};
use fs2::FileExt;
use parking_lot::RwLock;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const INDEX_MAGIC: [u8; 4] = *b"VIDX";
const INDEX_VERSION: u32 = 1;
const INDEX_HEADER_BYTES: u64 = 4096;
const DELETED_FLAG: u8 = 0x01;

/// Errors returned by [`UnifiedIndex`] operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Underlying mapped-region failure.
    #[error(transparent)]
    Mmap(#[from] MmapError),

    /// Underlying connection pool failure.
    #[error(transparent)]
    ConnectionPool(#[from] ConnectionPoolError),

    /// Underlying blob store failure.
    #[error(transparent)]
    Blob(#[from] BlobError),

    /// The index header's magic bytes don't match.
    #[error("bad unified index magic")]
    BadMagic,

    /// The index header's checksum doesn't match its contents.
    #[error("unified index header checksum mismatch")]
    HeaderChecksumMismatch,

    /// The requested id already exists (on `insert`).
    #[error("node {0:?} already exists")]
    AlreadyExists(NodeId),

    /// The requested id does not exist (on `update`/`remove`/`get`).
    #[error("node {0:?} not found")]
    NotFound(NodeId),

    /// The embedding's length does not match [`EMBEDDING_DIM`].
    #[error("embedding has {got} dimensions, expected {EMBEDDING_DIM}")]
    WrongDimension {
        /// The length actually supplied.
        got: usize,
    },

    /// A slot referenced by the graph or id map is out of bounds.
    #[error("slot {0:?} out of bounds")]
    SlotOutOfBounds(SlotId),

    /// A filesystem operation outside the mapped regions failed (e.g. the
    /// grow lock file).
    #[error("unified index io error: {0}")]
    Io(#[from] std::io::Error),
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct IndexedNode {
    id_high: u64,
    id_low: u64,
    hilbert_key: u64,
    connection_offset: u64,
    level: u8,
    flags: u8,
    connection_count: u16,
    reserved: [u8; 28],
}

const INDEXED_NODE_BYTES: u64 = 64;
const _: () = assert!(std::mem::size_of::<IndexedNode>() as u64 == INDEXED_NODE_BYTES);

impl IndexedNode {
    fn is_deleted(&self) -> bool {
        self.flags & DELETED_FLAG != 0
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct NodeMeta {
    // Canonical id for this slot: authoritative over `IndexedNode.id_*` on
    // rebuild, since a slot's hot-path id may legitimately be zero on some
    // restore paths while the cold metadata record never is.
    id_high: u64,
    id_low: u64,
    created_at: u64,
    accessed_at: u64,
    payload_offset: u64,
    edge_list_offset: u64,
    type_tag: u32,
    confidence_n: u32,
    payload_len: u32,
    edge_count: u32,
    decay_rate: f32,
    confidence_mu: f32,
    confidence_sigma_sq: f32,
    reserved: [u8; 4],
}

const NODE_META_BYTES: u64 = 80;
const _: () = assert!(std::mem::size_of::<NodeMeta>() as u64 == NODE_META_BYTES);

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct UnifiedIndexHeader {
    /// Count of currently-live nodes (excludes deleted slots).
    node_count: u64,
    capacity: u64,
    deleted_count: u64,
    /// First never-allocated slot; `next_slot == node_count + deleted_count`
    /// once no compaction has ever reused a freed slot out of order.
    next_slot: u64,
    snapshot_id: u64,
    wal_sequence: u64,
    version: u32,
    entry_point_slot: u32,
    max_level: u32,
    graph_m: u32,
    graph_ef_construction: u32,
    checksum: u32,
    magic: [u8; 4],
    reserved: [u8; 4020],
}

const _: () = assert!(std::mem::size_of::<UnifiedIndexHeader>() as u64 == INDEX_HEADER_BYTES);

impl UnifiedIndexHeader {
    fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.node_count.to_le_bytes());
        hasher.update(&self.capacity.to_le_bytes());
        hasher.update(&self.deleted_count.to_le_bytes());
        hasher.update(&self.next_slot.to_le_bytes());
        hasher.update(&self.snapshot_id.to_le_bytes());
        hasher.update(&self.wal_sequence.to_le_bytes());
        hasher.update(&self.version.to_le_bytes());
        hasher.update(&self.entry_point_slot.to_le_bytes());
        hasher.update(&self.max_level.to_le_bytes());
        hasher.update(&self.graph_m.to_le_bytes());
        hasher.update(&self.graph_ef_construction.to_le_bytes());
        hasher.finalize()
    }
}

/// Paths to the sibling files a [`UnifiedIndex`] binds together.
pub struct StorePaths {
    /// Hot slot array: one `IndexedNode` per slot.
    pub index: PathBuf,
    /// Cold metadata array: one `NodeMeta` per slot.
    pub meta: PathBuf,
    /// Quantized embeddings: one `QuantizedVector` per slot.
    pub vectors: PathBuf,
    /// Graph adjacency records.
    pub connections: PathBuf,
    /// Payloads and caller-facing edge lists.
    pub blob: PathBuf,
    /// Advisory lock coordinating `grow()` across processes sharing this store.
    pub grow_lock: PathBuf,
}

impl StorePaths {
    /// Derives the sibling paths from a directory.
    #[must_use]
    pub fn under(dir: &Path) -> Self {
        Self {
            index: dir.join("index.bin"),
            meta: dir.join("meta.bin"),
            vectors: dir.join("vectors.bin"),
            connections: dir.join("connections.bin"),
            blob: dir.join("blob.bin"),
            grow_lock: dir.join("grow.lock"),
        }
    }
}

/// A fully materialized search hit.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
    /// The matching node's id.
    pub id: NodeId,
    /// Cosine distance to the query (`1 - cosine similarity`), lower is closer.
    pub distance: f32,
}

/// The unified, memory-mapped index of all nodes in a store.
pub struct UnifiedIndex {
    index_region: MappedRegion,
    meta_region: MappedRegion,
    vectors_region: MappedRegion,
    connections: ConnectionPool,
    blob: BlobStore,
    id_to_slot: RwLock<HashMap<NodeId, SlotId>>,
    rng: parking_lot::Mutex<ChaCha8Rng>,
    graph_m: u32,
    graph_ef_construction: u32,
    connection_growth_factor: f64,
    level_cap: u8,
    grow_lock_path: PathBuf,
}

impl UnifiedIndex {
    /// Below this many live nodes, [`Self::search_two_stage`] falls back to
    /// the single-pass exact search instead of paying for a wide first pass.
    pub const TWO_PASS_MIN_LIVE_NODES: u64 = 1000;

    /// Creates a brand new, empty store at `paths`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if any sibling file cannot be created.
    pub fn create(
        paths: &StorePaths,
        initial_capacity: u32,
        graph_m: u32,
        graph_ef_construction: u32,
        level_cap: u8,
        blob_growth_factor: f64,
        connection_growth_factor: f64,
    ) -> Result<Self, IndexError> {
        let capacity = initial_capacity.max(16) as u64;
        let index_region = MappedRegion::create(
            &paths.index,
            INDEX_HEADER_BYTES + capacity * INDEXED_NODE_BYTES,
        )?;
        let meta_region =
            MappedRegion::create(&paths.meta, capacity * NODE_META_BYTES)?;
        let vectors_region = MappedRegion::create(
            &paths.vectors,
            capacity * QUANTIZED_VECTOR_BYTES as u64,
        )?;
        let connections = ConnectionPool::create(&paths.connections, 4096, connection_growth_factor)?;
        let blob = BlobStore::create(&paths.blob, (4096.0 * blob_growth_factor) as u64)?;

        let mut index = Self {
            index_region,
            meta_region,
            vectors_region,
            connections,
            blob,
            id_to_slot: RwLock::new(HashMap::new()),
            rng: parking_lot::Mutex::new(ChaCha8Rng::seed_from_u64(0xEDGE_u64)),
            graph_m,
            graph_ef_construction,
            connection_growth_factor,
            level_cap,
            grow_lock_path: paths.grow_lock.clone(),
        };

        let header = UnifiedIndexHeader {
            node_count: 0,
            capacity,
            deleted_count: 0,
            next_slot: 0,
            snapshot_id: 0,
            wal_sequence: 0,
            version: INDEX_VERSION,
            entry_point_slot: SlotId::INVALID.0,
            max_level: 0,
            graph_m,
            graph_ef_construction,
            checksum: 0,
            magic: INDEX_MAGIC,
            reserved: [0; 4020],
        };
        index.write_header(header)?;
        Ok(index)
    }

    /// Opens an existing store. Self-repairs the on-disk slot-array sizes if
    /// a prior process crashed mid-`grow` after extending the backing files
    /// but before committing the header's new `capacity`: in that case
    /// `capacity` understates `next_slot` and is widened back out before any
    /// other work happens.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::BadMagic`] or
    /// [`IndexError::HeaderChecksumMismatch`] on a malformed index file.
    pub fn open(
        paths: &StorePaths,
        connection_growth_factor: f64,
        level_cap: u8,
    ) -> Result<Self, IndexError> {
        let index_region = MappedRegion::open(&paths.index, false)?;
        let meta_region = MappedRegion::open(&paths.meta, false)?;
        let vectors_region = MappedRegion::open(&paths.vectors, false)?;
        let connections = ConnectionPool::open(&paths.connections, connection_growth_factor)?;
        let blob = BlobStore::open(&paths.blob)?;

        let index = Self {
            index_region,
            meta_region,
            vectors_region,
            connections,
            blob,
            id_to_slot: RwLock::new(HashMap::new()),
            rng: parking_lot::Mutex::new(ChaCha8Rng::seed_from_u64(0xEDGE_u64)),
            graph_m: 16,
            graph_ef_construction: 200,
            connection_growth_factor,
            level_cap,
            grow_lock_path: paths.grow_lock.clone(),
        };

        let header = index.read_header()?;
        if header.magic != INDEX_MAGIC {
            return Err(IndexError::BadMagic);
        }
        if header.checksum != header.checksum() {
            return Err(IndexError::HeaderChecksumMismatch);
        }

        let mut index = Self {
            graph_m: header.graph_m,
            graph_ef_construction: header.graph_ef_construction,
            ..index
        };

        // Self-repair: a crash between grow()'s file-extension phase and its
        // header-commit phase leaves the backing files larger than the
        // header admits. The files are never smaller than the header
        // believes (grow always extends before it commits), so it is always
        // safe to trust a header whose capacity covers every allocated
        // slot; only a header that has fallen behind needs fixing up.
        let header = if header.capacity < header.next_slot {
            let repaired_capacity = (header.next_slot * 2).max(16);
            log::warn!(
                "unified index: capacity {} short of next_slot {}, self-repairing to {repaired_capacity}",
                header.capacity,
                header.next_slot
            );
            index
                .index_region
                .resize(INDEX_HEADER_BYTES + repaired_capacity * INDEXED_NODE_BYTES)?;
            index.meta_region.resize(repaired_capacity * NODE_META_BYTES)?;
            index
                .vectors_region
                .resize(repaired_capacity * QUANTIZED_VECTOR_BYTES as u64)?;
            let mut repaired = header;
            repaired.capacity = repaired_capacity;
            index.write_header(repaired)?;
            repaired
        } else {
            header
        };

        index.rebuild_id_index(&header)?;
        Ok(index)
    }

    fn rebuild_id_index(&mut self, header: &UnifiedIndexHeader) -> Result<(), IndexError> {
        let mut id_to_slot = HashMap::new();
        for slot in 0..header.next_slot {
            let node = self.read_indexed_node(SlotId(slot as u32))?;
            if node.is_deleted() {
                continue;
            }
            // `NodeMeta.id` is canonical; `IndexedNode.id` may read zero on
            // some restore paths even for a live slot.
            let meta = self.read_meta(SlotId(slot as u32))?;
            let id = NodeId {
                high: meta.id_high,
                low: meta.id_low,
            };
            id_to_slot.insert(id, SlotId(slot as u32));
        }
        self.id_to_slot = RwLock::new(id_to_slot);
        Ok(())
    }

    fn read_header(&self) -> Result<UnifiedIndexHeader, IndexError> {
        let bytes = self.index_region.slice_at(0, INDEX_HEADER_BYTES)?;
        Ok(*bytemuck::from_bytes(bytes))
    }

    fn write_header(&mut self, mut header: UnifiedIndexHeader) -> Result<(), IndexError> {
        header.checksum = header.checksum();
        let bytes: &[u8] = bytemuck::bytes_of(&header);
        self.index_region.as_mut_slice()?[0..INDEX_HEADER_BYTES as usize].copy_from_slice(bytes);
        Ok(())
    }

    fn slot_offset(slot: SlotId) -> u64 {
        INDEX_HEADER_BYTES + u64::from(slot.0) * INDEXED_NODE_BYTES
    }

    fn read_indexed_node(&self, slot: SlotId) -> Result<IndexedNode, IndexError> {
        let bytes = self
            .index_region
            .slice_at(Self::slot_offset(slot), INDEXED_NODE_BYTES)?;
        Ok(*bytemuck::from_bytes(bytes))
    }

    fn write_indexed_node(&mut self, slot: SlotId, node: IndexedNode) -> Result<(), IndexError> {
        let offset = Self::slot_offset(slot);
        let bytes: &[u8] = bytemuck::bytes_of(&node);
        let len = bytes.len();
        self.index_region.as_mut_slice()?[offset as usize..offset as usize + len]
            .copy_from_slice(bytes);
        Ok(())
    }

    fn read_meta(&self, slot: SlotId) -> Result<NodeMeta, IndexError> {
        let offset = u64::from(slot.0) * NODE_META_BYTES;
        let bytes = self.meta_region.slice_at(offset, NODE_META_BYTES)?;
        Ok(*bytemuck::from_bytes(bytes))
    }

    fn write_meta(&mut self, slot: SlotId, meta: NodeMeta) -> Result<(), IndexError> {
        let offset = u64::from(slot.0) * NODE_META_BYTES;
        let bytes: &[u8] = bytemuck::bytes_of(&meta);
        let len = bytes.len();
        self.meta_region.as_mut_slice()?[offset as usize..offset as usize + len]
            .copy_from_slice(bytes);
        Ok(())
    }

    fn read_vector(&self, slot: SlotId) -> Result<QuantizedVector, IndexError> {
        let offset = u64::from(slot.0) * QUANTIZED_VECTOR_BYTES as u64;
        let bytes = self.vectors_region.slice_at(offset, QUANTIZED_VECTOR_BYTES as u64)?;
        Ok(*bytemuck::from_bytes(bytes))
    }

    fn write_vector(&mut self, slot: SlotId, vector: QuantizedVector) -> Result<(), IndexError> {
        let offset = u64::from(slot.0) * QUANTIZED_VECTOR_BYTES as u64;
        let bytes: &[u8] = bytemuck::bytes_of(&vector);
        let len = bytes.len();
        self.vectors_region.as_mut_slice()?[offset as usize..offset as usize + len]
            .copy_from_slice(bytes);
        Ok(())
    }

    /// Doubles the slot capacity of the index, meta and vectors regions.
    ///
    /// Takes an exclusive advisory lock on a sibling `grow.lock` file for the
    /// duration of the resize, so two processes sharing this store never
    /// race to extend the same mapping.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Mmap`] if any region fails to resize, or
    /// [`IndexError::Io`] if the grow lock cannot be acquired.
    pub fn grow(&mut self) -> Result<(), IndexError> {
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.grow_lock_path)?;
        lock_file.lock_exclusive()?;
        let result = (|| {
            let header = self.read_header()?;
            let new_capacity = header.capacity * 2;
            self.index_region
                .resize(INDEX_HEADER_BYTES + new_capacity * INDEXED_NODE_BYTES)?;
            self.meta_region.resize(new_capacity * NODE_META_BYTES)?;
            self.vectors_region
                .resize(new_capacity * QUANTIZED_VECTOR_BYTES as u64)?;
            let mut new_header = header;
            new_header.capacity = new_capacity;
            self.write_header(new_header)?;
            log::info!("unified index grew to capacity {new_capacity}");
            Ok(())
        })();
        let _ = lock_file.unlock();
        result
    }

    fn allocate_slot(&mut self) -> Result<SlotId, IndexError> {
        let header = self.read_header()?;
        if header.next_slot >= header.capacity {
            self.grow()?;
        }
        let header = self.read_header()?;
        let slot = SlotId(header.next_slot as u32);
        let mut header = header;
        header.next_slot += 1;
        self.write_header(header)?;
        Ok(slot)
    }

    fn distance_to(&self, query: &QuantizedVector, slot: SlotId) -> f32 {
        match self.read_vector(slot) {
            Ok(v) => 1.0 - quantized_cosine(query, &v),
            Err(_) => f32::MAX,
        }
    }

    fn hamming_distance_to(&self, query: &BinaryVector, slot: SlotId) -> f32 {
        match self.read_vector(slot) {
            Ok(v) => BinaryQuantizer::from_quantized(&v).hamming_distance(query) as f32,
            Err(_) => f32::MAX,
        }
    }

    fn live_neighbors(&self, slot: SlotId, layer: u8) -> Vec<SlotId> {
        let Ok(indexed) = self.read_indexed_node(slot) else {
            return Vec::new();
        };
        if layer as u16 >= u16::from(indexed.level) + 1 {
            return Vec::new();
        }
        let Ok(edges) = self.connections.read_level(indexed.connection_offset, layer) else {
            return Vec::new();
        };
        edges
            .into_iter()
            .map(|e| SlotId(e.target_slot))
            .filter(|&s| self.read_indexed_node(s).map(|n| !n.is_deleted()).unwrap_or(false))
            .collect()
    }

    /// Inserts a brand-new node and wires it into the proximity graph.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::AlreadyExists`] if `node.id` is already
    /// present, or [`IndexError::WrongDimension`] if the embedding is not
    /// [`EMBEDDING_DIM`]-dimensional.
    pub fn insert(&mut self, node: &Node) -> Result<SlotId, IndexError> {
        if node.embedding.len() != EMBEDDING_DIM {
            return Err(IndexError::WrongDimension {
                got: node.embedding.len(),
            });
        }
        if self.id_to_slot.read().contains_key(&node.id) {
            return Err(IndexError::AlreadyExists(node.id));
        }

        let quantized = quantization::quantize(&node.embedding);
        let hilbert_key = quantization::locality_key(&quantized);
        let level = {
            let mut rng = self.rng.lock();
            graph::assign_level(&mut *rng, self.graph_m, self.level_cap)
        };

        let slot = self.allocate_slot()?;
        self.write_vector(slot, quantized)?;

        let connection_offset = self.connections.allocate(slot.0, level + 1)?;

        let header = self.read_header()?;
        let entry_point = if header.entry_point_slot == SlotId::INVALID.0 {
            None
        } else {
            Some(SlotId(header.entry_point_slot))
        };

        if let Some(entry_point) = entry_point {
            self.connect_into_graph(slot, &quantized, level, entry_point, header.max_level as u8)?;
        }

        let mut new_header = header;
        if entry_point.is_none() || level as u32 > header.max_level {
            new_header.entry_point_slot = slot.0;
            new_header.max_level = u32::from(level);
        }
        self.write_header(new_header)?;

        let payload_offset = self.blob.store(&node.payload_bytes)?;
        let edge_list_offset = self.store_edges(&node.edges)?;

        let meta = NodeMeta {
            id_high: node.id.high,
            id_low: node.id.low,
            created_at: node.created_at,
            accessed_at: node.accessed_at,
            payload_offset,
            edge_list_offset,
            type_tag: node.type_tag,
            confidence_n: node.confidence.n,
            payload_len: node.payload_bytes.len() as u32,
            edge_count: node.edges.len() as u32,
            decay_rate: node.decay_rate,
            confidence_mu: node.confidence.mu,
            confidence_sigma_sq: node.confidence.sigma_sq,
            reserved: [0; 4],
        };
        self.write_meta(slot, meta)?;

        let indexed = IndexedNode {
            id_high: node.id.high,
            id_low: node.id.low,
            hilbert_key,
            connection_offset,
            level,
            flags: 0,
            connection_count: 0,
            reserved: [0; 28],
        };
        self.write_indexed_node(slot, indexed)?;

        let mut header = self.read_header()?;
        header.node_count += 1;
        self.write_header(header)?;

        self.id_to_slot.write().insert(node.id, slot);
        log::debug!("inserted node {:?} at slot {:?}, level {level}", node.id, slot);
        Ok(slot)
    }

    /// Overwrites an existing node's vector, metadata, payload and edges in
    /// place at its current slot. New payload/edge blobs are appended (the
    /// old ranges are orphaned until a compaction pass, which this engine
    /// does not implement); the slot's `connection_offset` and the
    /// proximity graph topology are left untouched, matching the spec's
    /// explicit choice not to re-link the graph on content change.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] if `id` is not present, or
    /// [`IndexError::WrongDimension`] if the embedding is not
    /// [`EMBEDDING_DIM`]-dimensional.
    pub fn update(&mut self, node: &Node) -> Result<SlotId, IndexError> {
        if node.embedding.len() != EMBEDDING_DIM {
            return Err(IndexError::WrongDimension {
                got: node.embedding.len(),
            });
        }
        let slot = self.slot_of(node.id).ok_or(IndexError::NotFound(node.id))?;

        let quantized = quantization::quantize(&node.embedding);
        let hilbert_key = quantization::locality_key(&quantized);
        self.write_vector(slot, quantized)?;

        let payload_offset = self.blob.store(&node.payload_bytes)?;
        let edge_list_offset = self.store_edges(&node.edges)?;

        let meta = NodeMeta {
            id_high: node.id.high,
            id_low: node.id.low,
            created_at: node.created_at,
            accessed_at: node.accessed_at,
            payload_offset,
            edge_list_offset,
            type_tag: node.type_tag,
            confidence_n: node.confidence.n,
            payload_len: node.payload_bytes.len() as u32,
            edge_count: node.edges.len() as u32,
            decay_rate: node.decay_rate,
            confidence_mu: node.confidence.mu,
            confidence_sigma_sq: node.confidence.sigma_sq,
            reserved: [0; 4],
        };
        self.write_meta(slot, meta)?;

        let mut indexed = self.read_indexed_node(slot)?;
        indexed.hilbert_key = hilbert_key;
        self.write_indexed_node(slot, indexed)?;

        log::debug!("updated node {:?} at slot {:?} in place", node.id, slot);
        Ok(slot)
    }

    fn store_edges(&mut self, edges: &[Edge]) -> Result<u64, IndexError> {
        let mut bytes = Vec::with_capacity(edges.len() * 24);
        for edge in edges {
            bytes.extend_from_slice(&edge.target_id.high.to_le_bytes());
            bytes.extend_from_slice(&edge.target_id.low.to_le_bytes());
            bytes.extend_from_slice(&edge.edge_type_tag.to_le_bytes());
            bytes.extend_from_slice(&edge.weight.to_le_bytes());
        }
        Ok(self.blob.store(&bytes)?)
    }

    fn load_edges(&self, offset: u64, count: u32) -> Result<Vec<Edge>, IndexError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let bytes = self.blob.read(offset)?;
        let mut edges = Vec::with_capacity(count as usize);
        for chunk in bytes.chunks_exact(24) {
            edges.push(Edge {
                target_id: NodeId {
                    high: u64::from_le_bytes(chunk[0..8].try_into().unwrap()),
                    low: u64::from_le_bytes(chunk[8..16].try_into().unwrap()),
                },
                edge_type_tag: u32::from_le_bytes(chunk[16..20].try_into().unwrap()),
                weight: f32::from_le_bytes(chunk[20..24].try_into().unwrap()),
            });
        }
        Ok(edges)
    }

    fn connect_into_graph(
        &mut self,
        slot: SlotId,
        quantized: &QuantizedVector,
        level: u8,
        entry_point: SlotId,
        top_layer: u8,
    ) -> Result<(), IndexError> {
        let mut current = entry_point;
        for layer in ((level + 1)..=top_layer).rev() {
            let found = graph::search_layer(
                &[current],
                layer,
                1,
                |s| self.distance_to(quantized, s),
                |s, l| self.live_neighbors(s, l),
            );
            if let Some(best) = found.into_iter().next() {
                current = best.slot;
            }
        }

        for layer in (0..=level.min(top_layer)).rev() {
            let candidates = graph::search_layer(
                &[current],
                layer,
                self.graph_ef_construction as usize,
                |s| self.distance_to(quantized, s),
                |s, l| self.live_neighbors(s, l),
            );
            let m = if layer == 0 {
                (self.graph_m * 2) as usize
            } else {
                self.graph_m as usize
            };
            let selected = graph::select_neighbors(candidates, m);
            if let Some(best) = selected.first() {
                current = best.slot;
            }

            let new_node = self.read_indexed_node(slot)?;
            let mut edges: Vec<PoolEdge> = selected
                .iter()
                .map(|s| PoolEdge {
                    target_slot: s.slot.0,
                    distance: s.distance,
                })
                .collect();
            let new_offset = self
                .connections
                .set_level_edges(new_node.connection_offset, layer, std::mem::take(&mut edges))?;
            let mut updated = self.read_indexed_node(slot)?;
            updated.connection_offset = new_offset;
            self.write_indexed_node(slot, updated)?;

            for neighbor in &selected {
                self.add_reverse_edge(neighbor.slot, slot, neighbor.distance, layer, m)?;
            }
        }
        Ok(())
    }

    fn add_reverse_edge(
        &mut self,
        from: SlotId,
        to: SlotId,
        distance: f32,
        layer: u8,
        m: usize,
    ) -> Result<(), IndexError> {
        let node = self.read_indexed_node(from)?;
        if layer as u16 > u16::from(node.level) {
            return Ok(());
        }
        let mut edges = self.connections.read_level(node.connection_offset, layer)?;
        edges.push(PoolEdge {
            target_slot: to.0,
            distance,
        });
        let scored: Vec<graph::Scored> = edges
            .into_iter()
            .map(|e| graph::Scored {
                distance: e.distance,
                slot: SlotId(e.target_slot),
            })
            .collect();
        let pruned = graph::select_neighbors(scored, m);
        let new_edges: Vec<PoolEdge> = pruned
            .into_iter()
            .map(|s| PoolEdge {
                target_slot: s.slot.0,
                distance: s.distance,
            })
            .collect();
        let new_offset = self.connections.set_level_edges(node.connection_offset, layer, new_edges)?;
        let mut updated = self.read_indexed_node(from)?;
        updated.connection_offset = new_offset;
        self.write_indexed_node(from, updated)
    }

    /// Removes the node with `id`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] if `id` is not present.
    pub fn remove(&mut self, id: NodeId) -> Result<(), IndexError> {
        let slot = self
            .id_to_slot
            .write()
            .remove(&id)
            .ok_or(IndexError::NotFound(id))?;
        let mut indexed = self.read_indexed_node(slot)?;
        indexed.flags |= DELETED_FLAG;
        self.write_indexed_node(slot, indexed)?;
        self.connections.remove(indexed.connection_offset)?;

        let mut header = self.read_header()?;
        header.deleted_count += 1;
        header.node_count -= 1;
        self.write_header(header)?;

        log::debug!("removed node {id:?} at slot {slot:?}");
        Ok(())
    }

    /// Returns the slot assigned to `id`, if live.
    #[must_use]
    pub fn slot_of(&self, id: NodeId) -> Option<SlotId> {
        self.id_to_slot.read().get(&id).copied()
    }

    /// Returns the id occupying `slot`, if it holds a live node.
    #[must_use]
    pub fn id_of_slot(&self, slot: SlotId) -> Option<NodeId> {
        let node = self.read_indexed_node(slot).ok()?;
        if node.is_deleted() || (node.id_high == 0 && node.id_low == 0) {
            None
        } else {
            Some(NodeId {
                high: node.id_high,
                low: node.id_low,
            })
        }
    }

    /// Materializes the full caller-facing [`Node`] for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] if `id` is not present.
    pub fn get(&self, id: NodeId) -> Result<Node, IndexError> {
        let slot = self.slot_of(id).ok_or(IndexError::NotFound(id))?;
        let indexed = self.read_indexed_node(slot)?;
        let meta = self.read_meta(slot)?;
        let quantized = self.read_vector(slot)?;
        let payload_bytes = if meta.payload_len == 0 {
            Vec::new()
        } else {
            self.blob.read(meta.payload_offset)?.to_vec()
        };
        let edges = self.load_edges(meta.edge_list_offset, meta.edge_count)?;

        Ok(Node {
            id: NodeId {
                high: indexed.id_high,
                low: indexed.id_low,
            },
            type_tag: meta.type_tag,
            created_at: meta.created_at,
            accessed_at: meta.accessed_at,
            decay_rate: meta.decay_rate,
            confidence: Confidence {
                mu: meta.confidence_mu,
                sigma_sq: meta.confidence_sigma_sq,
                n: meta.confidence_n,
            },
            embedding: quantization::dequantize(&quantized),
            payload_bytes,
            edges,
            tags: Vec::new(),
        })
    }

    /// Advances `accessed_at` for `id` without touching any other field.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] if `id` is not present.
    pub fn touch(&mut self, id: NodeId, accessed_at: u64) -> Result<(), IndexError> {
        let slot = self.slot_of(id).ok_or(IndexError::NotFound(id))?;
        let mut meta = self.read_meta(slot)?;
        meta.accessed_at = accessed_at;
        self.write_meta(slot, meta)
    }

    /// Overwrites the confidence triple for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] if `id` is not present.
    pub fn update_confidence(&mut self, id: NodeId, confidence: Confidence) -> Result<(), IndexError> {
        let slot = self.slot_of(id).ok_or(IndexError::NotFound(id))?;
        let mut meta = self.read_meta(slot)?;
        meta.confidence_mu = confidence.mu;
        meta.confidence_sigma_sq = confidence.sigma_sq;
        meta.confidence_n = confidence.n;
        self.write_meta(slot, meta)
    }

    /// Two-phase nearest-neighbor search: a wide, cheap Hamming-distance
    /// pass over the derived sign bits followed by an exact quantized
    /// cosine rerank of the surviving candidates. Stores with fewer than
    /// [`Self::TWO_PASS_MIN_LIVE_NODES`] live nodes fall back to
    /// [`Self::search`] directly: the wide first pass only pays for itself
    /// once the graph is large enough that a single-pass traversal risks
    /// missing candidates.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::WrongDimension`] if `query` is not
    /// [`EMBEDDING_DIM`]-dimensional.
    pub fn search_two_stage(&self, query: &[f32], k: usize, ef_search: usize) -> Result<Vec<SearchHit>, IndexError> {
        if query.len() != EMBEDDING_DIM {
            return Err(IndexError::WrongDimension { got: query.len() });
        }
        let header = self.read_header()?;
        if header.node_count == 0 {
            return Ok(Vec::new());
        }
        if header.node_count < Self::TWO_PASS_MIN_LIVE_NODES {
            return self.search(query, k, ef_search);
        }
        let entry_point = SlotId(header.entry_point_slot);
        let quantized_query = quantization::quantize(query);
        let binary_query = BinaryQuantizer::from_quantized(&quantized_query);

        let ef_first_pass = (10 * k).max(200).max(ef_search * 2);
        let wide = graph::search(
            entry_point,
            header.max_level as u8,
            ef_first_pass,
            ef_first_pass,
            |s| self.hamming_distance_to(&binary_query, s),
            |s, l| self.live_neighbors(s, l),
        );

        let mut reranked: Vec<SearchHit> = wide
            .into_iter()
            .filter_map(|scored| {
                let indexed = self.read_indexed_node(scored.slot).ok()?;
                Some(SearchHit {
                    id: NodeId {
                        high: indexed.id_high,
                        low: indexed.id_low,
                    },
                    distance: self.distance_to(&quantized_query, scored.slot),
                })
            })
            .collect();
        reranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        reranked.truncate(k);
        Ok(reranked)
    }

    /// Single-pass nearest-neighbor search using exact quantized cosine
    /// distance throughout, useful as a ground truth to validate
    /// [`Self::search_two_stage`] against.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::WrongDimension`] if `query` is not
    /// [`EMBEDDING_DIM`]-dimensional.
    pub fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Result<Vec<SearchHit>, IndexError> {
        if query.len() != EMBEDDING_DIM {
            return Err(IndexError::WrongDimension { got: query.len() });
        }
        let header = self.read_header()?;
        if header.node_count == 0 {
            return Ok(Vec::new());
        }
        let entry_point = SlotId(header.entry_point_slot);
        let quantized_query = quantization::quantize(query);

        let results = graph::search(
            entry_point,
            header.max_level as u8,
            ef_search.max(k),
            k,
            |s| self.distance_to(&quantized_query, s),
            |s, l| self.live_neighbors(s, l),
        );

        Ok(results
            .into_iter()
            .filter_map(|scored| {
                let indexed = self.read_indexed_node(scored.slot).ok()?;
                Some(SearchHit {
                    id: NodeId {
                        high: indexed.id_high,
                        low: indexed.id_low,
                    },
                    distance: scored.distance,
                })
            })
            .collect())
    }

    /// Iterates over every live node's id in slot order.
    pub fn iter_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        let header = self.read_header().unwrap_or(UnifiedIndexHeader {
            node_count: 0,
            capacity: 0,
            deleted_count: 0,
            next_slot: 0,
            snapshot_id: 0,
            wal_sequence: 0,
            version: 0,
            entry_point_slot: 0,
            max_level: 0,
            graph_m: 0,
            graph_ef_construction: 0,
            checksum: 0,
            magic: [0; 4],
            reserved: [0; 4020],
        });
        (0..header.next_slot).filter_map(move |slot| {
            let node = self.read_indexed_node(SlotId(slot as u32)).ok()?;
            if node.is_deleted() || (node.id_high == 0 && node.id_low == 0) {
                None
            } else {
                Some(NodeId {
                    high: node.id_high,
                    low: node.id_low,
                })
            }
        })
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.id_to_slot.read().len()
    }

    /// True if the store has no live nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records the WAL sequence number up to which this index reflects
    /// applied operations, so a future `open` knows where to resume replay.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Mmap`] if the header write fails.
    pub fn set_wal_sequence(&mut self, sequence: u64) -> Result<(), IndexError> {
        let mut header = self.read_header()?;
        header.wal_sequence = sequence;
        self.write_header(header)
    }

    /// The WAL sequence number this index last recorded.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Mmap`] if the header read fails.
    pub fn wal_sequence(&self) -> Result<u64, IndexError> {
        Ok(self.read_header()?.wal_sequence)
    }

    /// Flushes every mapped region and the connection pool/blob store.
    ///
    /// # Errors
    ///
    /// Returns the first failing component's error.
    pub fn sync(&self) -> Result<(), IndexError> {
        self.index_region.sync()?;
        self.meta_region.sync()?;
        self.vectors_region.sync()?;
        self.connections.sync()?;
        self.blob.sync()?;
        Ok(())
    }
}
