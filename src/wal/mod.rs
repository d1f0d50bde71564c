//! Write-Ahead Log: a single append-only file per store providing
//! durability and cross-process coordination via `flock`.
//!
//! Record layout: a 32-byte header `{magic, length, sequence, timestamp,
//! op, reserved[3], crc32_of_payload}` followed by `length − 32` bytes of
//! payload. Sequence numbers are monotonic, assigned by the appending
//! process under the file lock, and never reused — not even across
//! `truncate()`.

use crate::types::{Confidence, Edge, Node, NodeId};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAGIC: [u8; 4] = *b"VWAL";
const HEADER_BYTES: usize = 32;
const MAX_PAYLOAD_BYTES: u32 = 64 * 1024 * 1024;
const MAX_EDGE_COUNT: u32 = 1_000_000;
const MAX_TAG_COUNT: u32 = 100_000;
const MAX_TAG_LEN: u32 = 4096;

/// Errors returned by [`Wal`] operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O failure.
    #[error("io error on {path}: {source}")]
    Io {
        /// Path the error occurred on.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A record's declared payload length is implausibly large.
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(u32),

    /// A record's edge or tag count is implausibly large.
    #[error("record field count out of bounds: {0}")]
    FieldCountOutOfBounds(u32),

    /// A record ran out of bytes mid-parse (truncated tail).
    #[error("truncated record")]
    Truncated,

    /// A record's payload CRC did not match its header.
    #[error("checksum mismatch in record at sequence {0}")]
    ChecksumMismatch(u64),
}

impl WalError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The operation a WAL record represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalOp {
    /// A new node was inserted.
    Insert = 0,
    /// An existing node was overwritten.
    Update = 1,
    /// A node was soft-deleted.
    Delete = 2,
    /// A durability checkpoint; replay may stop treating earlier entries as
    /// necessary once one of these is observed.
    Checkpoint = 3,
}

impl WalOp {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Insert),
            1 => Some(Self::Update),
            2 => Some(Self::Delete),
            3 => Some(Self::Checkpoint),
            _ => None,
        }
    }
}

/// A decoded WAL record, ready for re-application during recovery or sync.
#[derive(Clone, Debug, PartialEq)]
pub enum WalRecord {
    /// A full node to (re-)insert.
    Insert(Node),
    /// A full node to overwrite an existing slot with.
    Update(Node),
    /// The id of a node to remove.
    Delete(NodeId),
    /// A snapshot path marking a durability checkpoint.
    Checkpoint(String),
}

fn serialize_node(node: &Node, out: &mut Vec<u8>) {
    out.extend_from_slice(&node.id.high.to_le_bytes());
    out.extend_from_slice(&node.id.low.to_le_bytes());
    out.extend_from_slice(&node.type_tag.to_le_bytes());
    out.extend_from_slice(&node.created_at.to_le_bytes());
    out.extend_from_slice(&node.accessed_at.to_le_bytes());
    out.extend_from_slice(&node.decay_rate.to_le_bytes());
    out.extend_from_slice(&node.confidence.mu.to_le_bytes());
    out.extend_from_slice(&node.confidence.sigma_sq.to_le_bytes());
    out.extend_from_slice(&node.confidence.n.to_le_bytes());
    for &v in &node.embedding {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out.extend_from_slice(&(node.payload_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&node.payload_bytes);
    out.extend_from_slice(&(node.edges.len() as u32).to_le_bytes());
    for edge in &node.edges {
        out.extend_from_slice(&edge.target_id.high.to_le_bytes());
        out.extend_from_slice(&edge.target_id.low.to_le_bytes());
        out.extend_from_slice(&edge.edge_type_tag.to_le_bytes());
        out.extend_from_slice(&edge.weight.to_le_bytes());
    }
    out.extend_from_slice(&(node.tags.len() as u32).to_le_bytes());
    for tag in &node.tags {
        let bytes = tag.as_bytes();
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(bytes);
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WalError> {
        if self.pos + n > self.bytes.len() {
            return Err(WalError::Truncated);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, WalError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, WalError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> Result<f32, WalError> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
}

fn deserialize_node(bytes: &[u8]) -> Result<Node, WalError> {
    let mut c = Cursor::new(bytes);
    let id = NodeId {
        high: c.u64()?,
        low: c.u64()?,
    };
    let type_tag = c.u32()?;
    let created_at = c.u64()?;
    let accessed_at = c.u64()?;
    let decay_rate = c.f32()?;
    let mu = c.f32()?;
    let sigma_sq = c.f32()?;
    let n = c.u32()?;

    let mut embedding = Vec::with_capacity(crate::types::EMBEDDING_DIM);
    for _ in 0..crate::types::EMBEDDING_DIM {
        embedding.push(c.f32()?);
    }

    let payload_len = c.u32()?;
    if payload_len > MAX_PAYLOAD_BYTES {
        return Err(WalError::PayloadTooLarge(payload_len));
    }
    let payload_bytes = c.take(payload_len as usize)?.to_vec();

    let edge_count = c.u32()?;
    if edge_count > MAX_EDGE_COUNT {
        return Err(WalError::FieldCountOutOfBounds(edge_count));
    }
    let mut edges = Vec::with_capacity(edge_count as usize);
    for _ in 0..edge_count {
        let target_id = NodeId {
            high: c.u64()?,
            low: c.u64()?,
        };
        let edge_type_tag = c.u32()?;
        let weight = c.f32()?;
        edges.push(Edge {
            target_id,
            edge_type_tag,
            weight,
        });
    }

    let tag_count = c.u32()?;
    if tag_count > MAX_TAG_COUNT {
        return Err(WalError::FieldCountOutOfBounds(tag_count));
    }
    let mut tags = Vec::with_capacity(tag_count as usize);
    for _ in 0..tag_count {
        let tag_len = c.u32()?;
        if tag_len > MAX_TAG_LEN {
            return Err(WalError::FieldCountOutOfBounds(tag_len));
        }
        let bytes = c.take(tag_len as usize)?;
        tags.push(String::from_utf8_lossy(bytes).into_owned());
    }

    Ok(Node {
        id,
        type_tag,
        created_at,
        accessed_at,
        decay_rate,
        confidence: Confidence { mu, sigma_sq, n },
        embedding,
        payload_bytes,
        edges,
        tags,
    })
}

/// The write-ahead log for one store.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Byte offset up to which this handle has observed records (own or
    /// peers'). Used by `sync` to resume without rescanning from the start.
    last_offset: u64,
    /// Highest sequence number this handle has observed.
    last_sequence: u64,
}

impl Wal {
    /// Creates a new, empty WAL file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] if the file cannot be created.
    pub fn create(path: &Path) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| WalError::io(path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            last_offset: 0,
            last_sequence: 0,
        })
    }

    /// Opens an existing WAL file, seeding `last_sequence` from `wal_sequence`
    /// so subsequent appends continue the correct numbering even before the
    /// first `replay_since`/`sync` call scans any records.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] if the file cannot be opened.
    pub fn open(path: &Path, wal_sequence: u64) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| WalError::io(path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            last_offset: 0,
            last_sequence: wal_sequence,
        })
    }

    fn catch_up_locked(&mut self) -> Result<(), WalError> {
        let len = self.file.metadata().map_err(|e| WalError::io(&self.path, e))?.len();
        if len <= self.last_offset {
            return Ok(());
        }
        self.file
            .seek(SeekFrom::Start(self.last_offset))
            .map_err(|e| WalError::io(&self.path, e))?;
        let mut remaining = len - self.last_offset;
        while remaining >= HEADER_BYTES as u64 {
            let mut header = [0u8; HEADER_BYTES];
            if self.file.read_exact(&mut header).is_err() {
                break;
            }
            let length = u32::from_le_bytes(header[4..8].try_into().unwrap());
            if length < HEADER_BYTES as u32 || u64::from(length) > remaining {
                break;
            }
            let sequence = u64::from_le_bytes(header[8..16].try_into().unwrap());
            let payload_len = length as usize - HEADER_BYTES;
            let mut payload = vec![0u8; payload_len];
            if self.file.read_exact(&mut payload).is_err() {
                break;
            }
            self.last_sequence = self.last_sequence.max(sequence);
            self.last_offset += u64::from(length);
            remaining -= u64::from(length);
        }
        Ok(())
    }

    fn write_record(
        &mut self,
        op: WalOp,
        payload: &[u8],
        timestamp: u64,
    ) -> Result<u64, WalError> {
        self.file
            .lock_exclusive()
            .map_err(|e| WalError::io(&self.path, e))?;
        let result = (|| {
            self.catch_up_locked()?;
            let sequence = self.last_sequence + 1;
            let length = (HEADER_BYTES + payload.len()) as u32;
            let crc = crc32fast::hash(payload);

            let mut record = Vec::with_capacity(length as usize);
            record.extend_from_slice(&MAGIC);
            record.extend_from_slice(&length.to_le_bytes());
            record.extend_from_slice(&sequence.to_le_bytes());
            record.extend_from_slice(&timestamp.to_le_bytes());
            record.push(op as u8);
            record.extend_from_slice(&[0u8; 3]);
            record.extend_from_slice(&crc.to_le_bytes());
            record.extend_from_slice(payload);

            self.file
                .seek(SeekFrom::Start(self.last_offset))
                .map_err(|e| WalError::io(&self.path, e))?;
            self.file
                .write_all(&record)
                .map_err(|e| WalError::io(&self.path, e))?;
            self.file.sync_all().map_err(|e| WalError::io(&self.path, e))?;

            self.last_sequence = sequence;
            self.last_offset += u64::from(length);
            Ok(sequence)
        })();
        let _ = self.file.unlock();
        result
    }

    /// Appends a node operation, returning its assigned sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] on lock/write/fsync failure.
    pub fn append(&mut self, op: WalOp, node: &Node, timestamp: u64) -> Result<u64, WalError> {
        debug_assert!(
            matches!(op, WalOp::Insert | WalOp::Update),
            "append(Insert|Update) carries a full node; use append_delete for Delete"
        );
        let mut payload = Vec::new();
        serialize_node(node, &mut payload);
        let sequence = self.write_record(op, &payload, timestamp)?;
        log::debug!("wal: appended {op:?} seq={sequence} id={:?}", node.id);
        Ok(sequence)
    }

    /// Appends a delete operation for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] on lock/write/fsync failure.
    pub fn append_delete(&mut self, id: NodeId, timestamp: u64) -> Result<u64, WalError> {
        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&id.high.to_le_bytes());
        payload.extend_from_slice(&id.low.to_le_bytes());
        let sequence = self.write_record(WalOp::Delete, &payload, timestamp)?;
        log::debug!("wal: appended Delete seq={sequence} id={id:?}");
        Ok(sequence)
    }

    /// Appends a checkpoint record naming `snapshot_path`.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] on lock/write/fsync failure.
    pub fn checkpoint(&mut self, snapshot_path: &str, timestamp: u64) -> Result<u64, WalError> {
        let sequence = self.write_record(WalOp::Checkpoint, snapshot_path.as_bytes(), timestamp)?;
        log::info!("wal: checkpoint seq={sequence} snapshot={snapshot_path}");
        Ok(sequence)
    }

    /// Reads records sequentially from the start under a shared lock,
    /// invoking `f(record, sequence)` for each non-checkpoint record whose
    /// sequence exceeds `since`. Stops silently at the first corrupt or
    /// truncated record, treating the log as ending there.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] if the lock cannot be acquired.
    pub fn replay_since(
        &mut self,
        since: u64,
        mut f: impl FnMut(WalRecord, u64),
    ) -> Result<(), WalError> {
        self.file
            .lock_shared()
            .map_err(|e| WalError::io(&self.path, e))?;
        let result = self.scan_locked(0, |record, seq| {
            if seq > since {
                f(record, seq);
            }
        });
        let _ = self.file.unlock();
        result.map(|_| ())
    }

    /// Resumes from this handle's last-seen byte offset and invokes
    /// `f(record, sequence)` for every new record, pulling in appends made
    /// by peer processes since the last call.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] if the lock cannot be acquired.
    pub fn sync(&mut self, mut f: impl FnMut(WalRecord, u64)) -> Result<(), WalError> {
        self.file
            .lock_shared()
            .map_err(|e| WalError::io(&self.path, e))?;
        let start = self.last_offset;
        let result = self.scan_locked(start, |record, seq| f(record, seq));
        let _ = self.file.unlock();
        result
    }

    fn scan_locked(
        &mut self,
        from_offset: u64,
        mut f: impl FnMut(WalRecord, u64),
    ) -> Result<(), WalError> {
        self.file
            .seek(SeekFrom::Start(from_offset))
            .map_err(|e| WalError::io(&self.path, e))?;
        let len = self.file.metadata().map_err(|e| WalError::io(&self.path, e))?.len();
        let mut offset = from_offset;

        while offset + HEADER_BYTES as u64 <= len {
            let mut header = [0u8; HEADER_BYTES];
            if self.file.read_exact(&mut header).is_err() {
                break;
            }
            if header[0..4] != MAGIC {
                log::warn!("wal: bad magic at offset {offset}, stopping scan");
                break;
            }
            let length = u32::from_le_bytes(header[4..8].try_into().unwrap());
            let sequence = u64::from_le_bytes(header[8..16].try_into().unwrap());
            let op_byte = header[24];
            let expected_crc = u32::from_le_bytes(header[28..32].try_into().unwrap());

            if length < HEADER_BYTES as u32 || offset + u64::from(length) > len {
                log::warn!("wal: truncated record at offset {offset}, stopping scan");
                break;
            }
            let payload_len = length as usize - HEADER_BYTES;
            let mut payload = vec![0u8; payload_len];
            if self.file.read_exact(&mut payload).is_err() {
                log::warn!("wal: short read at offset {offset}, stopping scan");
                break;
            }
            if crc32fast::hash(&payload) != expected_crc {
                log::warn!("wal: checksum mismatch at sequence {sequence}, stopping scan");
                break;
            }
            let Some(op) = WalOp::from_u8(op_byte) else {
                log::warn!("wal: unknown op byte {op_byte} at sequence {sequence}, stopping scan");
                break;
            };

            let record = match op {
                WalOp::Insert => deserialize_node(&payload).ok().map(WalRecord::Insert),
                WalOp::Update => deserialize_node(&payload).ok().map(WalRecord::Update),
                WalOp::Delete => {
                    if payload.len() == 16 {
                        Some(WalRecord::Delete(NodeId {
                            high: u64::from_le_bytes(payload[0..8].try_into().unwrap()),
                            low: u64::from_le_bytes(payload[8..16].try_into().unwrap()),
                        }))
                    } else {
                        None
                    }
                }
                WalOp::Checkpoint => {
                    Some(WalRecord::Checkpoint(String::from_utf8_lossy(&payload).into_owned()))
                }
            };

            match record {
                Some(record) => {
                    if !matches!(record, WalRecord::Checkpoint(_)) {
                        f(record, sequence);
                    }
                }
                None => {
                    log::warn!("wal: malformed payload at sequence {sequence}, stopping scan");
                    break;
                }
            }

            offset += u64::from(length);
            self.last_sequence = self.last_sequence.max(sequence);
        }
        self.last_offset = offset;
        Ok(())
    }

    /// Truncates the log to zero bytes. The sequence counter is preserved
    /// so future appends never reuse a number.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] on lock/truncate failure.
    pub fn truncate(&mut self) -> Result<(), WalError> {
        self.file
            .lock_exclusive()
            .map_err(|e| WalError::io(&self.path, e))?;
        let result = self.file.set_len(0).map_err(|e| WalError::io(&self.path, e));
        let _ = self.file.unlock();
        result?;
        self.last_offset = 0;
        Ok(())
    }
}
