//! Tree partition: copy-on-write posting store with snapshot readers.
//!
//! # Disk layout
//! ```text
//! {index}/{ordinal}/postings.bin   ← framed bincode of (entity, tuples) pairs
//! ```

use super::postings::PostingStore;
use crate::codec::{decode_framed, encode_framed, remove_dir_if_exists, write_atomically};
use crate::error::{IndexError, Result};
use crate::partition::{EntityIds, IndexPartition, PartitionOp, PartitionSearcher};
use crate::query::IndexQuery;
use crate::sampling::IndexSampler;
use crate::types::EntityId;
use crate::value::{Value, ValueTuple};
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

const FILE_NAME: &str = "postings.bin";
const MAGIC: &[u8; 4] = b"SKPT";

pub struct TreePartition {
    ordinal: usize,
    dir: PathBuf,
    /// Readers clone the Arc; writers copy-on-write through `Arc::make_mut`
    store: RwLock<Arc<PostingStore>>,
    dirty: AtomicBool,
    closed: AtomicBool,
}

impl TreePartition {
    pub fn create(dir: &Path, ordinal: usize, arity: usize) -> Result<Self> {
        remove_dir_if_exists(dir)?;
        fs::create_dir_all(dir)?;
        let partition = Self::with_store(dir, ordinal, PostingStore::new(arity));
        partition.dirty.store(true, Ordering::Release);
        partition.flush()?;
        Ok(partition)
    }

    pub fn open(dir: &Path, ordinal: usize, arity: usize) -> Result<Self> {
        let path = dir.join(FILE_NAME);
        let store = if path.exists() {
            let bytes = fs::read(&path)?;
            let payload = decode_framed(MAGIC, &bytes, &path)?;
            let entries: Vec<(EntityId, Vec<ValueTuple>)> = bincode::deserialize(payload)?;
            PostingStore::from_entries(arity, entries)
        } else {
            fs::create_dir_all(dir)?;
            PostingStore::new(arity)
        };
        debug!(partition = ordinal, entries = store.len(), "opened tree partition");
        Ok(Self::with_store(dir, ordinal, store))
    }

    fn with_store(dir: &Path, ordinal: usize, store: PostingStore) -> Self {
        Self {
            ordinal,
            dir: dir.to_path_buf(),
            store: RwLock::new(Arc::new(store)),
            dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IndexError::Partition {
                partition: self.ordinal,
                reason: "partition is closed".into(),
            });
        }
        Ok(())
    }
}

impl IndexPartition for TreePartition {
    type Searcher = TreeSearcher;

    fn ordinal(&self) -> usize {
        self.ordinal
    }

    fn acquire_searcher(&self) -> Result<TreeSearcher> {
        self.ensure_open()?;
        Ok(TreeSearcher {
            ordinal: self.ordinal,
            snapshot: Some(Arc::clone(&self.store.read())),
        })
    }

    fn apply(&self, op: &PartitionOp) -> Result<bool> {
        self.ensure_open()?;
        let mut guard = self.store.write();
        let store = Arc::make_mut(&mut guard);
        let changed = match op {
            PartitionOp::Insert { entity, values } => store.insert(*entity, values.clone()),
            PartitionOp::Delete { entity, values } => store.remove(*entity, values),
            PartitionOp::DeleteEntity { entity } => store.remove_entity(*entity),
        };
        if changed {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(changed)
    }

    fn insert_batch(&self, entries: Vec<(EntityId, ValueTuple)>) -> Result<usize> {
        self.ensure_open()?;
        let mut guard = self.store.write();
        let inserted = Arc::make_mut(&mut guard).insert_batch(entries);
        if inserted > 0 {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(inserted)
    }

    fn values_of(&self, entity: EntityId) -> Result<Vec<ValueTuple>> {
        Ok(self.store.read().values_of(entity))
    }

    fn contains(&self, entity: EntityId, values: &[Value]) -> Result<bool> {
        Ok(self.store.read().contains(entity, values))
    }

    fn entry_count(&self) -> u64 {
        self.store.read().len()
    }

    /// Writes are visible to searchers acquired after they were applied.
    fn refresh(&self) -> Result<()> {
        self.ensure_open()
    }

    fn flush(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let snapshot = Arc::clone(&self.store.read());
        let result = bincode::serialize(&snapshot.to_entries())
            .map_err(IndexError::from)
            .and_then(|payload| {
                write_atomically(&self.dir.join(FILE_NAME), &encode_framed(MAGIC, &payload))
            });
        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        result
    }

    fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.flush()?;
        self.closed.store(true, Ordering::Release);
        debug!(partition = self.ordinal, "closed tree partition");
        Ok(())
    }
}

/// Snapshot of one tree partition.
pub struct TreeSearcher {
    ordinal: usize,
    snapshot: Option<Arc<PostingStore>>,
}

impl TreeSearcher {
    fn store(&self) -> Result<&PostingStore> {
        self.snapshot.as_deref().ok_or_else(|| IndexError::Partition {
            partition: self.ordinal,
            reason: "searcher is closed".into(),
        })
    }
}

impl PartitionSearcher for TreeSearcher {
    fn search(&self, slot: usize, query: &IndexQuery) -> Result<EntityIds<'_>> {
        Ok(self.store()?.search(slot, query))
    }

    fn stored_values(&self, entity: EntityId) -> Result<Vec<ValueTuple>> {
        Ok(self.store()?.values_of(entity))
    }

    fn sample_into(&self, sampler: &mut dyn IndexSampler) -> Result<()> {
        self.store()?.sample_into(sampler);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.snapshot = None;
        Ok(())
    }
}
