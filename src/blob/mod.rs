//! Blob Store: an append-only file of variable-length byte records.
//!
//! Used for node payloads and caller-facing edge lists — anything whose
//! size isn't known until insert time. Records are never moved once
//! written; deleting a node simply abandons its range.

use crate::mmap::{MappedRegion, MmapError};
use bytemuck::{Pod, Zeroable};
use std::path::Path;
use thiserror::Error;

/// Errors returned by [`BlobStore`] operations.
#[derive(Debug, Error)]
pub enum BlobError {
    /// Underlying mapped-region failure.
    #[error(transparent)]
    Mmap(#[from] MmapError),

    /// The header's magic bytes don't match.
    #[error("bad blob store magic")]
    BadMagic,

    /// The header's checksum doesn't match its contents.
    #[error("blob store header checksum mismatch")]
    HeaderChecksumMismatch,

    /// A requested offset does not point at a valid record.
    #[error("invalid blob offset {0}")]
    InvalidOffset(u64),

    /// A record's declared size runs past the store's `used` watermark.
    #[error("corrupt record at offset {offset}: declared size {size} exceeds store bounds")]
    CorruptRecord {
        /// Offset of the malformed record.
        offset: u64,
        /// Size the record header declared.
        size: u32,
    },
}

const MAGIC: [u8; 4] = *b"VBLB";
const VERSION: u32 = 1;
const HEADER_BYTES: u64 = 64;
const GROWTH_ROUND: u64 = 16 * 1024 * 1024;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct Header {
    magic: [u8; 4],
    version: u32,
    total: u64,
    used: u64,
    count: u64,
    crc32: u32,
    reserved: [u8; 32],
}

const _: () = assert!(std::mem::size_of::<Header>() as u64 == HEADER_BYTES);

impl Header {
    fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.magic);
        hasher.update(&self.version.to_le_bytes());
        hasher.update(&self.total.to_le_bytes());
        hasher.update(&self.used.to_le_bytes());
        hasher.update(&self.count.to_le_bytes());
        hasher.finalize()
    }
}

/// An append-only store of size-prefixed byte records, backed by a single
/// memory-mapped file.
pub struct BlobStore {
    region: MappedRegion,
}

impl BlobStore {
    /// Creates a new, empty blob store at `path` with an initial file size.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Mmap`] if the file cannot be created.
    pub fn create(path: &Path, initial_size: u64) -> Result<Self, BlobError> {
        let size = initial_size.max(HEADER_BYTES);
        let mut region = MappedRegion::create(path, size)?;
        let header = Header {
            magic: MAGIC,
            version: VERSION,
            total: size,
            used: HEADER_BYTES,
            count: 0,
            crc32: 0,
            reserved: [0; 32],
        };
        Self::write_header(&mut region, header)?;
        Ok(Self { region })
    }

    /// Opens an existing blob store.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::BadMagic`] or [`BlobError::HeaderChecksumMismatch`]
    /// if the file is not a valid blob store.
    pub fn open(path: &Path) -> Result<Self, BlobError> {
        let region = MappedRegion::open(path, false)?;
        let store = Self { region };
        let header = store.read_header()?;
        if header.magic != MAGIC {
            return Err(BlobError::BadMagic);
        }
        if header.crc32 != header.checksum() {
            return Err(BlobError::HeaderChecksumMismatch);
        }
        Ok(store)
    }

    fn read_header(&self) -> Result<Header, BlobError> {
        let bytes = self.region.slice_at(0, HEADER_BYTES)?;
        Ok(*bytemuck::from_bytes(bytes))
    }

    fn write_header(region: &mut MappedRegion, mut header: Header) -> Result<(), BlobError> {
        header.crc32 = header.checksum();
        let bytes: &[u8] = bytemuck::bytes_of(&header);
        region.as_mut_slice()?[0..HEADER_BYTES as usize].copy_from_slice(bytes);
        Ok(())
    }

    /// Number of records ever stored (including abandoned ones).
    #[must_use]
    pub fn len(&self) -> u64 {
        self.read_header().map(|h| h.count).unwrap_or(0)
    }

    /// Returns true if no record has ever been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `bytes` and returns the offset of the new record (pointing at
    /// its `[size:u32]` prefix).
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Mmap`] if growing the backing file fails.
    pub fn store(&mut self, bytes: &[u8]) -> Result<u64, BlobError> {
        let mut header = self.read_header()?;
        let record_len = 4u64 + bytes.len() as u64;
        let offset = header.used;
        let needed = offset + record_len;

        if needed > header.total {
            let mut new_total = (header.total as f64 * 1.5) as u64;
            while new_total < needed {
                new_total = (new_total as f64 * 1.5) as u64;
            }
            new_total = new_total.div_ceil(GROWTH_ROUND) * GROWTH_ROUND;
            self.region.resize(new_total)?;
            header.total = new_total;
        }

        let slice = self.region.as_mut_slice()?;
        let size = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        let start = offset as usize;
        slice[start..start + 4].copy_from_slice(&size.to_le_bytes());
        slice[start + 4..start + 4 + bytes.len()].copy_from_slice(bytes);

        header.used = offset + record_len;
        header.count += 1;
        Self::write_header(&mut self.region, header)?;

        Ok(offset)
    }

    /// Reads the record stored at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::InvalidOffset`] or [`BlobError::CorruptRecord`]
    /// if the record is malformed.
    pub fn read(&self, offset: u64) -> Result<&[u8], BlobError> {
        let header = self.read_header()?;
        if offset < HEADER_BYTES || offset + 4 > header.used {
            return Err(BlobError::InvalidOffset(offset));
        }
        let size_bytes = self.region.slice_at(offset, 4)?;
        let size = u32::from_le_bytes(size_bytes.try_into().unwrap());
        let data_start = offset + 4;
        if data_start + u64::from(size) > header.used {
            return Err(BlobError::CorruptRecord { offset, size });
        }
        self.region
            .slice_at(data_start, u64::from(size))
            .map_err(BlobError::from)
    }

    /// Returns the declared size, in bytes, of the record at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::InvalidOffset`] if `offset` is out of range.
    pub fn size_at(&self, offset: u64) -> Result<u32, BlobError> {
        let header = self.read_header()?;
        if offset < HEADER_BYTES || offset + 4 > header.used {
            return Err(BlobError::InvalidOffset(offset));
        }
        let size_bytes = self.region.slice_at(offset, 4)?;
        Ok(u32::from_le_bytes(size_bytes.try_into().unwrap()))
    }

    /// Flushes the mapping to disk.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Mmap`] if the flush fails.
    pub fn sync(&self) -> Result<(), BlobError> {
        self.region.sync().map_err(BlobError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn store_then_read_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blobs.bin");
        let mut store = BlobStore::create(&path, 4096).unwrap();

        let off1 = store.store(b"hello").unwrap();
        let off2 = store.store(b"world!!").unwrap();

        assert_eq!(store.read(off1).unwrap(), b"hello");
        assert_eq!(store.read(off2).unwrap(), b"world!!");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn growth_preserves_existing_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blobs.bin");
        let mut store = BlobStore::create(&path, 128).unwrap();

        let big = vec![7u8; 1_000_000];
        let off = store.store(&big).unwrap();
        assert_eq!(store.read(off).unwrap(), big.as_slice());
    }

    #[test]
    fn reopen_validates_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blobs.bin");
        {
            let mut store = BlobStore::create(&path, 4096).unwrap();
            store.store(b"persisted").unwrap();
            store.sync().unwrap();
        }
        let store = BlobStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn invalid_offset_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blobs.bin");
        let store = BlobStore::create(&path, 4096).unwrap();
        assert!(matches!(store.read(0), Err(BlobError::InvalidOffset(_))));
    }
}
