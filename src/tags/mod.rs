//! Tag index: an in-memory inverted index from tag string to the set of
//! slots carrying it, plus the forward mapping needed to remove a slot's
//! tags without scanning every posting list.
//!
//! Persistence is a whole-file `postcard` serialize on `sync`/`close`
//! rather than an incremental append log — simpler than the sibling
//! mmap-backed stores, and acceptable because the index is rebuilt
//! entirely on every flush rather than replayed.

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors returned by [`TagIndex`] operations.
#[derive(Debug, Error)]
pub enum TagError {
    /// Underlying I/O failure.
    #[error("io error on {path}: {source}")]
    Io {
        /// Path the error occurred on.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The on-disk representation could not be decoded.
    #[error("failed to decode tag index at {path}: {source}")]
    Decode {
        /// Path the error occurred on.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: postcard::Error,
    },

    /// The on-disk representation could not be encoded.
    #[error("failed to encode tag index: {0}")]
    Encode(#[source] postcard::Error),
}

#[derive(Default, Serialize, Deserialize)]
struct Persisted {
    /// tag string -> sorted slot list (roaring bitmaps don't serialize via
    /// serde directly, so postings are flattened to sorted u32 vectors).
    postings: HashMap<String, Vec<u32>>,
}

/// An in-memory tag index, loaded and saved as a whole file.
#[derive(Default)]
pub struct TagIndex {
    postings: HashMap<String, RoaringBitmap>,
    forward: HashMap<u32, Vec<String>>,
}

impl TagIndex {
    /// Creates an empty tag index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a tag index from `path`, or returns an empty index if the file
    /// does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::Io`] or [`TagError::Decode`] on a corrupt file.
    pub fn open(path: &Path) -> Result<Self, TagError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = fs::read(path).map_err(|source| TagError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let persisted: Persisted =
            postcard::from_bytes(&bytes).map_err(|source| TagError::Decode {
                path: path.to_path_buf(),
                source,
            })?;

        let mut index = Self::new();
        for (tag, slots) in persisted.postings {
            let mut bitmap = RoaringBitmap::new();
            for slot in &slots {
                bitmap.insert(*slot);
                index.forward.entry(*slot).or_default().push(tag.clone());
            }
            index.postings.insert(tag, bitmap);
        }
        Ok(index)
    }

    /// Serializes the whole index and writes it to `path` atomically (via a
    /// temp-file-then-rename).
    ///
    /// # Errors
    ///
    /// Returns [`TagError::Encode`] if serialization fails, or
    /// [`TagError::Io`] if the write fails.
    pub fn save(&self, path: &Path) -> Result<(), TagError> {
        let mut postings = HashMap::with_capacity(self.postings.len());
        for (tag, bitmap) in &self.postings {
            postings.insert(tag.clone(), bitmap.iter().collect());
        }
        let persisted = Persisted { postings };
        let bytes = postcard::to_allocvec(&persisted).map_err(TagError::Encode)?;

        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, &bytes).map_err(|source| TagError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, path).map_err(|source| TagError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Associates `tag` with `slot`. Idempotent.
    pub fn add(&mut self, slot: u32, tag: &str) {
        let forward_entry = self.forward.entry(slot).or_default();
        if !forward_entry.iter().any(|t| t == tag) {
            forward_entry.push(tag.to_string());
        }
        self.postings.entry(tag.to_string()).or_default().insert(slot);
    }

    /// Removes the association between `tag` and `slot`, if present.
    pub fn remove(&mut self, slot: u32, tag: &str) {
        if let Some(bitmap) = self.postings.get_mut(tag) {
            bitmap.remove(slot);
            if bitmap.is_empty() {
                self.postings.remove(tag);
            }
        }
        if let Some(tags) = self.forward.get_mut(&slot) {
            tags.retain(|t| t != tag);
            if tags.is_empty() {
                self.forward.remove(&slot);
            }
        }
    }

    /// Removes every tag association for `slot` (used on node delete/reuse).
    pub fn remove_all(&mut self, slot: u32) {
        if let Some(tags) = self.forward.remove(&slot) {
            for tag in tags {
                if let Some(bitmap) = self.postings.get_mut(&tag) {
                    bitmap.remove(slot);
                    if bitmap.is_empty() {
                        self.postings.remove(&tag);
                    }
                }
            }
        }
    }

    /// Returns the set of slots carrying `tag`, or an empty bitmap if the
    /// tag is unknown.
    #[must_use]
    pub fn slots_with_tag(&self, tag: &str) -> RoaringBitmap {
        self.postings.get(tag).cloned().unwrap_or_default()
    }

    /// Filters `candidates` down to those carrying `tag`.
    #[must_use]
    pub fn filter_by_tag(&self, candidates: &RoaringBitmap, tag: &str) -> RoaringBitmap {
        match self.postings.get(tag) {
            Some(bitmap) => candidates & bitmap,
            None => RoaringBitmap::new(),
        }
    }

    /// Returns the tags currently associated with `slot`.
    #[must_use]
    pub fn tags_for_slot(&self, slot: u32) -> &[String] {
        self.forward.get(&slot).map_or(&[], Vec::as_slice)
    }

    /// Total number of distinct tag strings.
    #[must_use]
    pub fn tag_count(&self) -> usize {
        self.postings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn add_then_lookup() {
        let mut index = TagIndex::new();
        index.add(1, "red");
        index.add(2, "red");
        index.add(2, "blue");

        let red = index.slots_with_tag("red");
        assert!(red.contains(1));
        assert!(red.contains(2));
        assert_eq!(index.tags_for_slot(2), &["red".to_string(), "blue".to_string()]);
    }

    #[test]
    fn remove_all_clears_forward_and_postings() {
        let mut index = TagIndex::new();
        index.add(1, "red");
        index.add(1, "blue");
        index.remove_all(1);

        assert!(index.slots_with_tag("red").is_empty());
        assert!(index.slots_with_tag("blue").is_empty());
        assert!(index.tags_for_slot(1).is_empty());
        assert_eq!(index.tag_count(), 0);
    }

    #[test]
    fn filter_by_tag_intersects() {
        let mut index = TagIndex::new();
        index.add(1, "red");
        index.add(2, "red");
        index.add(3, "red");

        let mut candidates = RoaringBitmap::new();
        candidates.insert(1);
        candidates.insert(3);
        candidates.insert(99);

        let filtered = index.filter_by_tag(&candidates, "red");
        assert!(filtered.contains(1));
        assert!(filtered.contains(3));
        assert!(!filtered.contains(99));
    }

    #[test]
    fn save_then_open_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tags.bin");

        let mut index = TagIndex::new();
        index.add(1, "red");
        index.add(2, "red");
        index.add(2, "blue");
        index.save(&path).unwrap();

        let reopened = TagIndex::open(&path).unwrap();
        assert!(reopened.slots_with_tag("red").contains(1));
        assert!(reopened.slots_with_tag("red").contains(2));
        assert!(reopened.slots_with_tag("blue").contains(2));
        assert_eq!(reopened.tags_for_slot(2).len(), 2);
    }

    #[test]
    fn open_missing_file_returns_empty_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.bin");
        let index = TagIndex::open(&path).unwrap();
        assert_eq!(index.tag_count(), 0);
    }
}
