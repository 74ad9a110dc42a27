//! Partitioned lifecycle over any `PartitionBackend`
//!
//! One logical index lives in `{root}/{provider key}/{index id}/`, with one
//! subdirectory per partition ordinal. New entries always go to the last
//! (active) partition; once it holds `max_entries_per_partition` entries a
//! new partition is started.

mod accessor;
mod populator;
mod provider;
mod updater;

pub use accessor::PartitionedAccessor;
pub use populator::PartitionedPopulator;
pub use provider::PartitionedIndexProvider;

use crate::codec::remove_dir_if_exists;
use crate::config::IndexSamplingConfig;
use crate::error::{IndexError, Result};
use crate::partition::{
    release_all, IndexPartition, PartitionBackend, PartitionOp, PartitionedReader,
};
use crate::types::{EntityId, IndexDescriptor, IndexId};
use crate::update::{IndexEntryUpdate, PropertyAccessor, UpdateKind};
use crate::value::{same_tuple, tuple_hash, Value, ValueTuple};
use ahash::AHashMap;
use parking_lot::{RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

type Searcher<B> = <<B as PartitionBackend>::Partition as IndexPartition>::Searcher;
type Partitions<B> = Vec<<B as PartitionBackend>::Partition>;

/// Absorbed data conflicts: removing an absent entry, adding a present one,
/// key-only updates without a property lookup.
#[derive(Debug, Default)]
pub struct ConflictCounter(AtomicU64);

impl ConflictCounter {
    pub fn record(&self, n: u64) {
        if n > 0 {
            self.0.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Value changes applied by one batch, for samplers.
#[derive(Debug, Default)]
pub(crate) struct AppliedChanges {
    pub added: Vec<ValueTuple>,
    pub removed: Vec<ValueTuple>,
}

pub(crate) struct PartitionedIndex<B: PartitionBackend> {
    id: IndexId,
    backend: Arc<B>,
    dir: PathBuf,
    descriptor: IndexDescriptor,
    max_entries: u64,
    /// Upgradable reads serialize writers while readers keep acquiring
    partitions: RwLock<Partitions<B>>,
    conflicts: Arc<ConflictCounter>,
}

impl<B: PartitionBackend> PartitionedIndex<B> {
    /// Start an empty index in `dir`, discarding anything already there.
    pub fn create(
        id: IndexId,
        backend: Arc<B>,
        dir: &Path,
        descriptor: &IndexDescriptor,
        max_entries: u64,
    ) -> Result<Self> {
        remove_dir_if_exists(dir)?;
        fs::create_dir_all(dir)?;
        let first = backend.create_partition(&dir.join("0"), 0, descriptor)?;
        info!(index_id = id, backend = backend.name(), dir = %dir.display(), "created index");
        Ok(Self::with_partitions(id, backend, dir, descriptor, max_entries, vec![first]))
    }

    /// Open every partition found in `dir`.
    pub fn open(
        id: IndexId,
        backend: Arc<B>,
        dir: &Path,
        descriptor: &IndexDescriptor,
        max_entries: u64,
    ) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let mut ordinals: Vec<usize> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().and_then(|n| n.parse().ok()))
            .collect();
        ordinals.sort_unstable();

        let mut partitions = Vec::with_capacity(ordinals.len().max(1));
        for (position, ordinal) in ordinals.into_iter().enumerate() {
            // Ordinals are dense; a gap means a partition was lost.
            if ordinal != position {
                return Err(IndexError::Corrupt {
                    path: dir.join(ordinal.to_string()),
                    reason: format!("expected partition {position}"),
                });
            }
            partitions.push(backend.open_partition(&dir.join(ordinal.to_string()), ordinal, descriptor)?);
        }
        if partitions.is_empty() {
            partitions.push(backend.create_partition(&dir.join("0"), 0, descriptor)?);
        }
        info!(index_id = id, partitions = partitions.len(), "opened index");
        Ok(Self::with_partitions(id, backend, dir, descriptor, max_entries, partitions))
    }

    fn with_partitions(
        id: IndexId,
        backend: Arc<B>,
        dir: &Path,
        descriptor: &IndexDescriptor,
        max_entries: u64,
        partitions: Partitions<B>,
    ) -> Self {
        Self {
            id,
            backend,
            dir: dir.to_path_buf(),
            descriptor: descriptor.clone(),
            max_entries: max_entries.max(1),
            partitions: RwLock::new(partitions),
            conflicts: Arc::new(ConflictCounter::default()),
        }
    }

    pub fn id(&self) -> IndexId {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    pub fn conflicts(&self) -> u64 {
        self.conflicts.get()
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.read().len()
    }

    pub fn entry_count(&self) -> u64 {
        self.partitions.read().iter().map(|p| p.entry_count()).sum()
    }

    /// Apply updates in order. Key-only updates resolve their values
    /// through `lookup`; without one they are absorbed as conflicts.
    pub fn apply(
        &self,
        updates: &[IndexEntryUpdate],
        lookup: Option<&dyn PropertyAccessor>,
    ) -> Result<AppliedChanges> {
        let mut parts = self.partitions.upgradable_read();
        let mut touched = BTreeSet::new();
        let mut changes = AppliedChanges::default();
        let mut conflicts = 0u64;

        for update in updates {
            let entity = update.entity_id;
            match &update.kind {
                UpdateKind::Add(values) => {
                    if self.insert(&parts, entity, values, &mut touched)? {
                        changes.added.push(values.clone());
                    } else {
                        conflicts += 1;
                    }
                }
                UpdateKind::Change { before, after } => {
                    if self.delete(&parts, entity, before, &mut touched)? {
                        changes.removed.push(before.clone());
                    } else {
                        conflicts += 1;
                    }
                    if self.insert(&parts, entity, after, &mut touched)? {
                        changes.added.push(after.clone());
                    } else {
                        conflicts += 1;
                    }
                }
                UpdateKind::Remove(values) => {
                    if self.delete(&parts, entity, values, &mut touched)? {
                        changes.removed.push(values.clone());
                    } else {
                        conflicts += 1;
                    }
                }
                UpdateKind::Touched => {
                    let Some(lookup) = lookup else {
                        conflicts += 1;
                        continue;
                    };
                    for p in parts.iter() {
                        for stored in p.values_of(entity)? {
                            changes.removed.push(stored);
                        }
                        if p.apply(&PartitionOp::DeleteEntity { entity })? {
                            touched.insert(p.ordinal());
                        }
                    }
                    if let Some(values) = lookup.values_for(entity, self.descriptor.schema()) {
                        if self.insert(&parts, entity, &values, &mut touched)? {
                            changes.added.push(values);
                        }
                    }
                }
            }
            parts = self.roll_over_if_full(parts, &mut touched)?;
        }

        for ordinal in touched {
            if let Some(p) = parts.get(ordinal) {
                p.refresh()?;
            }
        }
        if conflicts > 0 {
            debug!(index_id = self.id, conflicts, "absorbed conflicting updates");
            self.conflicts.record(conflicts);
        }
        Ok(changes)
    }

    /// Bulk path used by population. Entries already held anywhere, or
    /// repeated within the batch, are skipped and counted as conflicts.
    pub fn add_batch(&self, entries: Vec<(EntityId, ValueTuple)>) -> Result<AppliedChanges> {
        let mut conflicts = 0u64;
        let mut seen: AHashMap<(EntityId, u64), Vec<usize>> = AHashMap::with_capacity(entries.len());
        let mut pending: Vec<(EntityId, ValueTuple)> = Vec::with_capacity(entries.len());
        for (entity, values) in entries {
            let slots = seen.entry((entity, tuple_hash(&values))).or_default();
            if slots.iter().any(|&i| same_tuple(&pending[i].1, &values)) {
                conflicts += 1;
                continue;
            }
            slots.push(pending.len());
            pending.push((entity, values));
        }

        let mut parts = self.partitions.upgradable_read();
        let mut changes = AppliedChanges::default();
        let mut touched = BTreeSet::new();
        let mut rest = pending.into_iter();
        let mut chunk = Vec::new();
        while rest.len() > 0 {
            // A rollover seals the active partition, so every chunk is
            // checked against all partitions present when it is cut.
            parts = self.roll_over_if_full(parts, &mut touched)?;
            let Some(active) = parts.last() else {
                break;
            };
            let room = self.max_entries.saturating_sub(active.entry_count()).max(1) as usize;
            for (entity, values) in rest.by_ref() {
                if held(&parts[..], entity, &values)? {
                    conflicts += 1;
                    continue;
                }
                chunk.push((entity, values));
                if chunk.len() == room {
                    break;
                }
            }
            if chunk.is_empty() {
                break;
            }
            let take = chunk.len();
            changes.added.extend(chunk.iter().map(|(_, values)| values.clone()));
            let added = active.insert_batch(std::mem::take(&mut chunk))?;
            touched.insert(active.ordinal());
            conflicts += (take - added) as u64;
        }

        for ordinal in touched {
            if let Some(p) = parts.get(ordinal) {
                p.refresh()?;
            }
        }
        if conflicts > 0 {
            debug!(index_id = self.id, conflicts, "skipped entries already indexed");
            self.conflicts.record(conflicts);
        }
        Ok(changes)
    }

    fn insert(
        &self,
        parts: &Partitions<B>,
        entity: EntityId,
        values: &[Value],
        touched: &mut BTreeSet<usize>,
    ) -> Result<bool> {
        if held(&parts[..], entity, values)? {
            return Ok(false);
        }
        let Some(active) = parts.last() else {
            return Ok(false);
        };
        let changed = active.apply(&PartitionOp::Insert {
            entity,
            values: values.iter().cloned().collect(),
        })?;
        if changed {
            touched.insert(active.ordinal());
        }
        Ok(changed)
    }

    fn delete(
        &self,
        parts: &Partitions<B>,
        entity: EntityId,
        values: &[Value],
        touched: &mut BTreeSet<usize>,
    ) -> Result<bool> {
        let op = PartitionOp::Delete {
            entity,
            values: values.iter().cloned().collect(),
        };
        let mut changed = false;
        for p in parts.iter() {
            if p.apply(&op)? {
                touched.insert(p.ordinal());
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Start a new partition when the active one is full.
    fn roll_over_if_full<'a>(
        &'a self,
        parts: RwLockUpgradableReadGuard<'a, Partitions<B>>,
        touched: &mut BTreeSet<usize>,
    ) -> Result<RwLockUpgradableReadGuard<'a, Partitions<B>>> {
        let full = parts.last().is_some_and(|p| p.entry_count() >= self.max_entries);
        if !full {
            return Ok(parts);
        }
        let ordinal = parts.len();
        if let Some(active) = parts.last() {
            active.refresh()?;
            touched.remove(&active.ordinal());
        }
        let next = self
            .backend
            .create_partition(&self.dir.join(ordinal.to_string()), ordinal, &self.descriptor)?;
        let mut write = RwLockUpgradableReadGuard::upgrade(parts);
        write.push(next);
        info!(index_id = self.id, partition = ordinal, "rolled over to new partition");
        Ok(RwLockWriteGuard::downgrade_to_upgradable(write))
    }

    /// Reader over a snapshot of every partition.
    pub fn new_reader(&self, sampling: IndexSamplingConfig) -> Result<PartitionedReader<Searcher<B>>> {
        let parts = self.partitions.read();
        let mut searchers = Vec::with_capacity(parts.len());
        for p in parts.iter() {
            match p.acquire_searcher() {
                Ok(searcher) => searchers.push(searcher),
                Err(e) => {
                    // Release what was already acquired before reporting.
                    drop(PartitionedReader::new(self.descriptor.clone(), sampling, searchers));
                    return Err(e);
                }
            }
        }
        Ok(PartitionedReader::new(self.descriptor.clone(), sampling, searchers))
    }

    pub fn flush(&self) -> Result<()> {
        for p in self.partitions.read().iter() {
            p.flush()?;
        }
        Ok(())
    }

    /// Close every partition, reporting all failures together.
    pub fn close(&self) -> Result<()> {
        let parts = self.partitions.read();
        let result = release_all(parts.iter().map(|p| (p.ordinal(), p.close())));
        debug!(index_id = self.id, partitions = parts.len(), "closed index");
        result
    }

    /// Delete the files of an index. A missing directory is fine.
    pub fn destroy(dir: &Path) -> Result<()> {
        remove_dir_if_exists(dir)
    }
}

fn held<P: IndexPartition>(parts: &[P], entity: EntityId, values: &[Value]) -> Result<bool> {
    for p in parts {
        if p.contains(entity, values)? {
            return Ok(true);
        }
    }
    Ok(false)
}
