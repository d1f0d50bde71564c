//! Connection Pool: variable-length per-node adjacency records with a
//! best-fit free list, backed by a single mapped file.
//!
//! Every node's outgoing edges, one packed list per graph layer it
//! participates in, live in one record here. Records move whenever they
//! change size (a new edge no longer fits), so the owning slot's
//! `connection_offset` is reassigned on every mutation — callers must write
//! the returned offset back into the owning `IndexedNode`.

use crate::mmap::{MappedRegion, MmapError};
use std::path::Path;
use thiserror::Error;

/// Errors returned by [`ConnectionPool`] operations.
#[derive(Debug, Error)]
pub enum ConnectionPoolError {
    /// Underlying mapped-region failure.
    #[error(transparent)]
    Mmap(#[from] MmapError),

    /// The header's magic bytes don't match.
    #[error("bad connection pool magic")]
    BadMagic,

    /// The header's checksum doesn't match its contents.
    #[error("connection pool header checksum mismatch")]
    HeaderChecksumMismatch,

    /// The record at `offset` has its deleted flag set.
    #[error("connection record at offset {0} is deleted")]
    RecordDeleted(u64),

    /// A requested offset does not point at a valid record.
    #[error("invalid connection pool offset {0}")]
    InvalidOffset(u64),

    /// A requested level exceeds the record's `level_count`.
    #[error("level {level} out of range for record with {level_count} levels")]
    LevelOutOfRange {
        /// Level requested.
        level: u8,
        /// Levels actually present in the record.
        level_count: u8,
    },
}

const MAGIC: [u8; 4] = *b"VCXN";
const VERSION: u32 = 1;
const HEADER_BYTES: u64 = 64;
const RECORD_HEADER_BYTES: u64 = 8;
const EDGE_BYTES: u64 = 8;
const FREE_BLOCK_BYTES: u64 = 16;
const DELETED_FLAG: u8 = 0x01;

/// One outgoing edge: the neighbor's slot and the distance to it at the
/// time the edge was written.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoolEdge {
    /// Target slot id.
    pub target_slot: u32,
    /// Distance (1 − similarity) recorded at insertion time.
    pub distance: f32,
}

/// A connection record as read back from the pool: the owning slot, the
/// number of levels it spans, and the edges at each level.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionRecord {
    /// Owning slot id.
    pub slot_id: u32,
    /// Number of graph layers this record has an edge list for.
    pub level_count: u8,
    /// Edges per level, `levels[l]` holding layer `l`'s outgoing edges.
    pub levels: Vec<Vec<PoolEdge>>,
}

impl ConnectionRecord {
    fn encoded_len(&self) -> u64 {
        let mut len = RECORD_HEADER_BYTES;
        for level in &self.levels {
            len += 2 + EDGE_BYTES * level.len() as u64;
        }
        len
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.slot_id.to_le_bytes());
        out.push(self.level_count);
        out.push(0); // flags
        out.extend_from_slice(&0u16.to_le_bytes()); // reserved
        for level in &self.levels {
            let count = u16::try_from(level.len()).unwrap_or(u16::MAX);
            out.extend_from_slice(&count.to_le_bytes());
            for edge in level {
                out.extend_from_slice(&edge.target_slot.to_le_bytes());
                out.extend_from_slice(&edge.distance.to_le_bytes());
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Header {
    total: u64,
    used: u64,
    node_count: u64,
    free_list_head: u64,
    version: u32,
    checksum: u32,
}

impl Header {
    fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.total.to_le_bytes());
        hasher.update(&self.used.to_le_bytes());
        hasher.update(&self.node_count.to_le_bytes());
        hasher.update(&self.free_list_head.to_le_bytes());
        hasher.update(&self.version.to_le_bytes());
        hasher.finalize()
    }

    fn read(region: &MappedRegion) -> Result<Self, ConnectionPoolError> {
        let bytes = region.slice_at(0, HEADER_BYTES)?;
        if bytes[40..44] != MAGIC {
            return Err(ConnectionPoolError::BadMagic);
        }
        let h = Self {
            total: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            used: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            node_count: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
            free_list_head: u64::from_le_bytes(bytes[24..32].try_into().unwrap()),
            version: u32::from_le_bytes(bytes[32..36].try_into().unwrap()),
            checksum: u32::from_le_bytes(bytes[36..40].try_into().unwrap()),
        };
        if h.checksum != h.checksum() {
            return Err(ConnectionPoolError::HeaderChecksumMismatch);
        }
        Ok(h)
    }

    fn write(&self, region: &mut MappedRegion) -> Result<(), ConnectionPoolError> {
        let slice = region.as_mut_slice()?;
        slice[0..8].copy_from_slice(&self.total.to_le_bytes());
        slice[8..16].copy_from_slice(&self.used.to_le_bytes());
        slice[16..24].copy_from_slice(&self.node_count.to_le_bytes());
        slice[24..32].copy_from_slice(&self.free_list_head.to_le_bytes());
        slice[32..36].copy_from_slice(&self.version.to_le_bytes());
        slice[36..40].copy_from_slice(&self.checksum().to_le_bytes());
        slice[40..44].copy_from_slice(&MAGIC);
        Ok(())
    }
}

/// Reclaimed-block header threaded through the free list.
struct FreeBlock {
    next_offset: u64,
    size: u32,
}

impl FreeBlock {
    fn read(region: &MappedRegion, offset: u64) -> Result<Self, ConnectionPoolError> {
        let bytes = region.slice_at(offset, FREE_BLOCK_BYTES)?;
        Ok(Self {
            next_offset: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            size: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
        })
    }

    fn write(
        region: &mut MappedRegion,
        offset: u64,
        next_offset: u64,
        size: u32,
    ) -> Result<(), ConnectionPoolError> {
        let slice = region.as_mut_slice()?;
        let start = offset as usize;
        slice[start..start + 8].copy_from_slice(&next_offset.to_le_bytes());
        slice[start + 8..start + 12].copy_from_slice(&size.to_le_bytes());
        slice[start + 12..start + 16].copy_from_slice(&0u32.to_le_bytes());
        Ok(())
    }
}

/// The connection pool: a mapped file of variable-length adjacency records
/// plus a best-fit free list over reclaimed space.
pub struct ConnectionPool {
    region: MappedRegion,
    growth_factor: f64,
}

impl ConnectionPool {
    /// Creates a new, empty connection pool at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionPoolError::Mmap`] if the file cannot be created.
    pub fn create(
        path: &Path,
        initial_size: u64,
        growth_factor: f64,
    ) -> Result<Self, ConnectionPoolError> {
        let size = initial_size.max(HEADER_BYTES);
        let mut region = MappedRegion::create(path, size)?;
        let header = Header {
            total: size,
            used: HEADER_BYTES,
            node_count: 0,
            free_list_head: 0,
            version: VERSION,
            checksum: 0,
        };
        header.write(&mut region)?;
        Ok(Self {
            region,
            growth_factor,
        })
    }

    /// Opens an existing connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionPoolError::BadMagic`] or
    /// [`ConnectionPoolError::HeaderChecksumMismatch`] on a malformed file.
    pub fn open(path: &Path, growth_factor: f64) -> Result<Self, ConnectionPoolError> {
        let region = MappedRegion::open(path, false)?;
        let pool = Self {
            region,
            growth_factor,
        };
        Header::read(&pool.region)?;
        Ok(pool)
    }

    fn header(&self) -> Result<Header, ConnectionPoolError> {
        Header::read(&self.region)
    }

    fn ensure_capacity(&mut self, needed_extra: u64) -> Result<(), ConnectionPoolError> {
        let header = self.header()?;
        if header.used + needed_extra <= header.total {
            return Ok(());
        }
        let mut new_total = ((header.total as f64) * self.growth_factor) as u64;
        while new_total < header.used + needed_extra {
            new_total = ((new_total as f64) * self.growth_factor) as u64;
        }
        self.region.resize(new_total)?;
        let mut header = header;
        header.total = new_total;
        header.write(&mut self.region)?;
        Ok(())
    }

    /// Best-fit search over the free list; returns `(offset, block_size)` of
    /// the smallest block at least `needed` bytes, unlinking it from the list.
    fn take_free_block(&mut self, needed: u64) -> Result<Option<(u64, u64)>, ConnectionPoolError> {
        let header = self.header()?;
        let mut prev: Option<u64> = None;
        let mut cursor = header.free_list_head;
        let mut best: Option<(u64, u64, Option<u64>)> = None; // (offset, size, prev)

        while cursor != 0 {
            let block = FreeBlock::read(&self.region, cursor)?;
            let size = u64::from(block.size);
            if size >= needed && best.map(|(_, best_size, _)| size < best_size).unwrap_or(true) {
                best = Some((cursor, size, prev));
            }
            prev = Some(cursor);
            cursor = block.next_offset;
        }

        let Some((offset, size, best_prev)) = best else {
            return Ok(None);
        };

        // Unlink `offset` from the list.
        let next = FreeBlock::read(&self.region, offset)?.next_offset;
        match best_prev {
            Some(prev_offset) => {
                let prev_size = FreeBlock::read(&self.region, prev_offset)?.size;
                FreeBlock::write(&mut self.region, prev_offset, next, prev_size)?;
            }
            None => {
                let mut header = self.header()?;
                header.free_list_head = next;
                header.write(&mut self.region)?;
            }
        }

        // Split the residue if it's large enough to host another free block.
        let residue = size - needed;
        if residue > FREE_BLOCK_BYTES + 64 {
            let residue_offset = offset + needed;
            let header = self.header()?;
            FreeBlock::write(
                &mut self.region,
                residue_offset,
                header.free_list_head,
                u32::try_from(residue).unwrap_or(u32::MAX),
            )?;
            let mut header = header;
            header.free_list_head = residue_offset;
            header.write(&mut self.region)?;
            return Ok(Some((offset, needed)));
        }

        Ok(Some((offset, size)))
    }

    fn append_at_end(&mut self, needed: u64) -> Result<u64, ConnectionPoolError> {
        self.ensure_capacity(needed)?;
        let mut header = self.header()?;
        let offset = header.used;
        header.used += needed;
        header.write(&mut self.region)?;
        Ok(offset)
    }

    /// Allocates a fresh record for `slot_id` with `level_count` empty edge
    /// lists (one per graph layer the node participates in).
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionPoolError::Mmap`] if growing the file fails.
    pub fn allocate(&mut self, slot_id: u32, level_count: u8) -> Result<u64, ConnectionPoolError> {
        let record = ConnectionRecord {
            slot_id,
            level_count,
            levels: vec![Vec::new(); level_count as usize],
        };
        self.write_new_record(&record)
    }

    fn write_new_record(&mut self, record: &ConnectionRecord) -> Result<u64, ConnectionPoolError> {
        let needed = record.encoded_len();
        let offset = match self.take_free_block(needed)? {
            Some((offset, _)) => offset,
            None => self.append_at_end(needed)?,
        };
        let mut bytes = Vec::with_capacity(needed as usize);
        record.encode(&mut bytes);
        let slice = self.region.as_mut_slice()?;
        let start = offset as usize;
        slice[start..start + bytes.len()].copy_from_slice(&bytes);

        let mut header = self.header()?;
        header.node_count += 1;
        header.write(&mut self.region)?;
        Ok(offset)
    }

    /// Reads the full record at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionPoolError::RecordDeleted`] if the record's
    /// deleted flag is set, or [`ConnectionPoolError::InvalidOffset`] if
    /// `offset` does not point at a valid record.
    pub fn read(&self, offset: u64) -> Result<ConnectionRecord, ConnectionPoolError> {
        let header = self.header()?;
        if offset < HEADER_BYTES || offset + RECORD_HEADER_BYTES > header.used {
            return Err(ConnectionPoolError::InvalidOffset(offset));
        }
        let rec_header = self.region.slice_at(offset, RECORD_HEADER_BYTES)?;
        let slot_id = u32::from_le_bytes(rec_header[0..4].try_into().unwrap());
        let level_count = rec_header[4];
        let flags = rec_header[5];
        if flags & DELETED_FLAG != 0 {
            return Err(ConnectionPoolError::RecordDeleted(offset));
        }

        let mut cursor = offset + RECORD_HEADER_BYTES;
        let mut levels = Vec::with_capacity(level_count as usize);
        for _ in 0..level_count {
            let count_bytes = self.region.slice_at(cursor, 2)?;
            let count = u16::from_le_bytes(count_bytes.try_into().unwrap());
            cursor += 2;
            let mut edges = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let edge_bytes = self.region.slice_at(cursor, EDGE_BYTES)?;
                edges.push(PoolEdge {
                    target_slot: u32::from_le_bytes(edge_bytes[0..4].try_into().unwrap()),
                    distance: f32::from_le_bytes(edge_bytes[4..8].try_into().unwrap()),
                });
                cursor += EDGE_BYTES;
            }
            levels.push(edges);
        }

        Ok(ConnectionRecord {
            slot_id,
            level_count,
            levels,
        })
    }

    /// Reads only the edges at `level`, without materializing other levels.
    /// O(sum of prior levels' edge counts).
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionPoolError::LevelOutOfRange`] if `level` exceeds
    /// the record's `level_count`.
    pub fn read_level(&self, offset: u64, level: u8) -> Result<Vec<PoolEdge>, ConnectionPoolError> {
        let header = self.header()?;
        if offset < HEADER_BYTES || offset + RECORD_HEADER_BYTES > header.used {
            return Err(ConnectionPoolError::InvalidOffset(offset));
        }
        let rec_header = self.region.slice_at(offset, RECORD_HEADER_BYTES)?;
        let level_count = rec_header[4];
        if level >= level_count {
            return Err(ConnectionPoolError::LevelOutOfRange { level, level_count });
        }

        let mut cursor = offset + RECORD_HEADER_BYTES;
        for l in 0..level {
            let count_bytes = self.region.slice_at(cursor, 2)?;
            let count = u16::from_le_bytes(count_bytes.try_into().unwrap());
            cursor += 2 + EDGE_BYTES * u64::from(count);
            let _ = l;
        }

        let count_bytes = self.region.slice_at(cursor, 2)?;
        let count = u16::from_le_bytes(count_bytes.try_into().unwrap());
        cursor += 2;
        let mut edges = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let edge_bytes = self.region.slice_at(cursor, EDGE_BYTES)?;
            edges.push(PoolEdge {
                target_slot: u32::from_le_bytes(edge_bytes[0..4].try_into().unwrap()),
                distance: f32::from_le_bytes(edge_bytes[4..8].try_into().unwrap()),
            });
            cursor += EDGE_BYTES;
        }
        Ok(edges)
    }

    /// Marks the record at `offset` deleted. The space is not returned to
    /// the free list immediately — that would require overwriting the
    /// deleted flag we just set. Reclamation happens only via compaction.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionPoolError::InvalidOffset`] if `offset` is invalid.
    pub fn remove(&mut self, offset: u64) -> Result<(), ConnectionPoolError> {
        let header = self.header()?;
        if offset < HEADER_BYTES || offset + RECORD_HEADER_BYTES > header.used {
            return Err(ConnectionPoolError::InvalidOffset(offset));
        }
        let slice = self.region.as_mut_slice()?;
        let flags_pos = offset as usize + 5;
        slice[flags_pos] |= DELETED_FLAG;
        Ok(())
    }

    /// Appends `edge` to `level` of the record at `offset`: reads the
    /// record, mutates it in memory, marks the old record deleted, and
    /// allocates a new record at a new offset. Callers must persist the
    /// returned offset into the owning slot's `connection_offset`.
    ///
    /// # Errors
    ///
    /// Propagates any read/write failure.
    pub fn add_connection(
        &mut self,
        offset: u64,
        level: u8,
        edge: PoolEdge,
    ) -> Result<u64, ConnectionPoolError> {
        let mut record = self.read(offset)?;
        record.levels[level as usize].push(edge);
        self.remove(offset)?;
        self.write_new_record(&record)
    }

    /// Replaces the entire edge list at `level` with `edges`, leaving other
    /// levels untouched. Used by graph construction to write a selected
    /// neighbor set in one record move instead of one `add_connection` call
    /// per edge.
    ///
    /// # Errors
    ///
    /// Propagates any read/write failure.
    pub fn set_level_edges(
        &mut self,
        offset: u64,
        level: u8,
        edges: Vec<PoolEdge>,
    ) -> Result<u64, ConnectionPoolError> {
        let mut record = self.read(offset)?;
        record.levels[level as usize] = edges;
        self.remove(offset)?;
        self.write_new_record(&record)
    }

    /// Flushes the mapping to disk.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionPoolError::Mmap`] if the flush fails.
    pub fn sync(&self) -> Result<(), ConnectionPoolError> {
        self.region.sync().map_err(ConnectionPoolError::from)
    }

    /// Number of records ever allocated (including deleted ones).
    #[must_use]
    pub fn len(&self) -> u64 {
        self.header().map(|h| h.node_count).unwrap_or(0)
    }

    /// True if no record has ever been allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
