//! Store façade: the single entry point callers use. Binds the unified
//! index, the write-ahead log and the tag index together and sequences
//! every mutation as "log it, then apply it" for crash durability.

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::snapshot;
use crate::tags::TagIndex;
use crate::types::{Confidence, Node, NodeId};
use crate::unified::{SearchHit, StorePaths, UnifiedIndex};
use crate::wal::{Wal, WalOp, WalRecord};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The persistent, memory-mapped associative vector store.
pub struct Store {
    dir: PathBuf,
    inner: RwLock<UnifiedIndex>,
    wal: Mutex<Wal>,
    tags: RwLock<TagIndex>,
    config: StoreConfig,
}

impl Store {
    fn tags_path(dir: &Path) -> PathBuf {
        dir.join("tags.bin")
    }

    fn wal_path(dir: &Path) -> PathBuf {
        dir.join("wal.log")
    }

    /// Creates a brand-new store in `dir`, which must not already contain
    /// an index file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if `dir` already holds a
    /// store, or any component error on failure to create a sibling file.
    pub fn create(dir: &Path, config: StoreConfig) -> Result<Self, StoreError> {
        let paths = StorePaths::under(dir);
        if paths.index.exists() {
            return Err(StoreError::AlreadyExists(dir.to_path_buf()));
        }
        std::fs::create_dir_all(dir)?;

        let inner = UnifiedIndex::create(
            &paths,
            config.initial_capacity,
            config.graph_m,
            config.graph_ef_construction,
            config.max_level,
            config.blob_growth_factor,
            config.connection_growth_factor,
        )?;
        let wal = Wal::create(&Self::wal_path(dir))?;
        let tags = TagIndex::new();

        Ok(Self {
            dir: dir.to_path_buf(),
            inner: RwLock::new(inner),
            wal: Mutex::new(wal),
            tags: RwLock::new(tags),
            config,
        })
    }

    /// Opens an existing store in `dir`, replaying any WAL entries the
    /// on-disk index header has not yet caught up to.
    ///
    /// # Errors
    ///
    /// Returns a component error if any sibling file is missing or corrupt.
    pub fn open(dir: &Path, config: StoreConfig) -> Result<Self, StoreError> {
        let paths = StorePaths::under(dir);
        let mut inner = UnifiedIndex::open(&paths, config.connection_growth_factor, config.max_level)?;
        let applied_sequence = inner.wal_sequence()?;

        let mut wal = Wal::open(&Self::wal_path(dir), applied_sequence)?;
        let tags = TagIndex::open(&Self::tags_path(dir))?;
        let tags = RwLock::new(tags);

        let mut last_sequence = applied_sequence;
        wal.replay_since(applied_sequence, |record, sequence| {
            apply_record(&mut inner, &tags, record);
            last_sequence = last_sequence.max(sequence);
        })?;
        inner.set_wal_sequence(last_sequence)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            inner: RwLock::new(inner),
            wal: Mutex::new(wal),
            tags,
            config,
        })
    }

    /// Inserts a new node, durably logging it before it becomes visible.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Index`] wrapping
    /// [`crate::unified::IndexError::AlreadyExists`] if the id is taken.
    pub fn insert(&self, node: Node) -> Result<(), StoreError> {
        let sequence = {
            let mut wal = self.wal.lock();
            wal.append(WalOp::Insert, &node, now_millis())?
        };
        let tags_to_add = node.tags.clone();
        let id = node.id;
        let mut inner = self.inner.write();
        let slot = inner.insert(&node)?;
        inner.set_wal_sequence(sequence)?;
        drop(inner);

        let mut tags = self.tags.write();
        for tag in &tags_to_add {
            tags.add(slot.0, tag);
        }
        log::info!("store: inserted {id:?}");
        Ok(())
    }

    /// Replaces an existing node's payload, metadata and vector in place.
    ///
    /// Overwrites the node's existing slot rather than removing and
    /// reinserting it: the proximity graph topology is not touched, per
    /// the engine's explicit choice not to re-link the graph on content
    /// change.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Index`] wrapping
    /// [`crate::unified::IndexError::NotFound`] if the id is absent.
    pub fn update(&self, node: Node) -> Result<(), StoreError> {
        let sequence = {
            let mut wal = self.wal.lock();
            wal.append(WalOp::Update, &node, now_millis())?
        };
        let tags_to_add = node.tags.clone();
        let id = node.id;

        let mut inner = self.inner.write();
        let slot = inner.update(&node)?;
        inner.set_wal_sequence(sequence)?;
        drop(inner);

        let mut tags = self.tags.write();
        tags.remove_all(slot.0);
        for tag in &tags_to_add {
            tags.add(slot.0, tag);
        }
        log::info!("store: updated {id:?}");
        Ok(())
    }

    /// Removes a node.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Index`] wrapping
    /// [`crate::unified::IndexError::NotFound`] if the id is absent.
    pub fn remove(&self, id: NodeId) -> Result<(), StoreError> {
        let sequence = {
            let mut wal = self.wal.lock();
            wal.append_delete(id, now_millis())?
        };
        let mut inner = self.inner.write();
        if let Some(slot) = inner.slot_of(id) {
            self.tags.write().remove_all(slot.0);
        }
        inner.remove(id)?;
        inner.set_wal_sequence(sequence)?;
        log::info!("store: removed {id:?}");
        Ok(())
    }

    /// Fetches a node, including its tags.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Index`] wrapping
    /// [`crate::unified::IndexError::NotFound`] if the id is absent.
    pub fn get(&self, id: NodeId) -> Result<Node, StoreError> {
        let inner = self.inner.read();
        let mut node = inner.get(id)?;
        if let Some(slot) = inner.slot_of(id) {
            node.tags = self.tags.read().tags_for_slot(slot.0).to_vec();
        }
        Ok(node)
    }

    /// Advances `accessed_at` without a WAL entry — a best-effort stat
    /// update a crash may roll back, which callers accept by using this
    /// method instead of [`Self::update`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Index`] wrapping
    /// [`crate::unified::IndexError::NotFound`] if the id is absent.
    pub fn touch(&self, id: NodeId) -> Result<(), StoreError> {
        self.inner.write().touch(id, now_millis())?;
        Ok(())
    }

    /// Overwrites the confidence triple for `id`, logging the full node
    /// to the WAL first so the change survives a crash.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Index`] wrapping
    /// [`crate::unified::IndexError::NotFound`] if the id is absent.
    pub fn update_confidence(&self, id: NodeId, confidence: Confidence) -> Result<(), StoreError> {
        let mut node = self.get(id)?;
        node.confidence = confidence;
        let sequence = {
            let mut wal = self.wal.lock();
            wal.append(WalOp::Update, &node, now_millis())?
        };
        let mut inner = self.inner.write();
        inner.update_confidence(id, confidence)?;
        inner.set_wal_sequence(sequence)?;
        Ok(())
    }

    /// Two-pass approximate nearest-neighbor search.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Index`] wrapping
    /// [`crate::unified::IndexError::WrongDimension`] if `query`'s length
    /// is wrong.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, StoreError> {
        Ok(self
            .inner
            .read()
            .search_two_stage(query, k, self.config.graph_ef_search as usize)?)
    }

    /// Single-pass exact-quantized-distance search, useful for validating
    /// [`Self::search`]'s recall.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Index`] wrapping
    /// [`crate::unified::IndexError::WrongDimension`] if `query`'s length
    /// is wrong.
    pub fn search_exact(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, StoreError> {
        Ok(self
            .inner
            .read()
            .search(query, k, self.config.graph_ef_search as usize)?)
    }

    /// Returns the ids of every node carrying `tag`.
    #[must_use]
    pub fn lookup_by_tag(&self, tag: &str) -> Vec<NodeId> {
        let inner = self.inner.read();
        self.tags
            .read()
            .slots_with_tag(tag)
            .iter()
            .filter_map(|slot| inner.id_of_slot(crate::types::SlotId(slot)))
            .collect()
    }

    /// Returns the slot currently assigned to `id`, if live.
    #[must_use]
    pub fn lookup(&self, id: NodeId) -> Option<crate::types::SlotId> {
        self.inner.read().slot_of(id)
    }

    /// Adds `tag` to `id`. Implemented as a full `update` so the change is
    /// WAL-logged like any other mutation of persisted fields, per the
    /// engine's "tag changes are not special-cased" policy.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Index`] wrapping
    /// [`crate::unified::IndexError::NotFound`] if the id is absent.
    pub fn add_tag(&self, id: NodeId, tag: &str) -> Result<(), StoreError> {
        let mut node = self.get(id)?;
        if !node.tags.iter().any(|t| t == tag) {
            node.tags.push(tag.to_string());
        }
        self.update(node)
    }

    /// Removes `tag` from `id`, if present. See [`Self::add_tag`] for why
    /// this goes through a full `update`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Index`] wrapping
    /// [`crate::unified::IndexError::NotFound`] if the id is absent.
    pub fn remove_tag(&self, id: NodeId, tag: &str) -> Result<(), StoreError> {
        let mut node = self.get(id)?;
        node.tags.retain(|t| t != tag);
        self.update(node)
    }

    /// Returns every tag currently associated with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Index`] wrapping
    /// [`crate::unified::IndexError::NotFound`] if the id is absent.
    pub fn tags_for(&self, id: NodeId) -> Result<Vec<String>, StoreError> {
        Ok(self.get(id)?.tags)
    }

    /// Iterates over every live node's id.
    pub fn iterate(&self) -> Vec<NodeId> {
        self.inner.read().iter_ids().collect()
    }

    /// Pulls in any peer-process WAL writes, applying them to the
    /// in-memory index, then flushes every mapped region and the tag
    /// index to disk.
    ///
    /// # Errors
    ///
    /// Returns the first failing component's error.
    pub fn sync(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let tags = &self.tags;
        let mut last_sequence = inner.wal_sequence()?;
        self.wal.lock().sync(|record, sequence| {
            apply_record(&mut inner, tags, record);
            last_sequence = last_sequence.max(sequence);
        })?;
        inner.set_wal_sequence(last_sequence)?;
        inner.sync()?;
        drop(inner);

        self.tags.read().save(&Self::tags_path(&self.dir))?;
        Ok(())
    }

    /// Flushes the store and copies every sibling file into `dest_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Snapshot`] if `dest_dir` is not empty or the
    /// copy fails, or any flush error from [`Self::sync`].
    pub fn create_snapshot(&self, dest_dir: &Path) -> Result<(), StoreError> {
        self.sync()?;
        snapshot::create_snapshot(&self.dir, dest_dir, self.config.snapshot_use_reflink)?;
        log::info!("store: snapshot written to {}", dest_dir.display());
        Ok(())
    }

    /// Flushes the store. Equivalent to [`Self::sync`]; provided so callers
    /// have an explicit, named point to call before dropping a `Store`.
    ///
    /// # Errors
    ///
    /// Returns the first failing component's error.
    pub fn close(&self) -> Result<(), StoreError> {
        self.sync()
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True if the store has no live nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn apply_record(inner: &mut UnifiedIndex, tags: &RwLock<TagIndex>, record: WalRecord) {
    match record {
        WalRecord::Insert(node) => {
            // Idempotent: replaying an already-applied insert is a no-op.
            if let Ok(slot) = inner.insert(&node) {
                let mut tags = tags.write();
                for tag in &node.tags {
                    tags.add(slot.0, tag);
                }
            }
        }
        WalRecord::Update(node) => {
            if let Some(slot) = inner.slot_of(node.id) {
                tags.write().remove_all(slot.0);
                if inner.update(&node).is_ok() {
                    let mut tags = tags.write();
                    for tag in &node.tags {
                        tags.add(slot.0, tag);
                    }
                }
            } else if let Ok(slot) = inner.insert(&node) {
                let mut tags = tags.write();
                for tag in &node.tags {
                    tags.add(slot.0, tag);
                }
            }
        }
        WalRecord::Delete(id) => {
            if let Some(slot) = inner.slot_of(id) {
                tags.write().remove_all(slot.0);
            }
            let _ = inner.remove(id);
        }
        WalRecord::Checkpoint(_) => {}
    }
}
