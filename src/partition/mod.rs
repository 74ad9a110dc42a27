//! Index partitions
//!
//! One logical index is stored as one or more physical partitions. Every
//! partition is searchable on its own; `PartitionedReader` composes their
//! searchers into a single ascending stream of entity ids.
//!
//! Backends plug in through `PartitionBackend`:
//! - `tree`: sorted postings + coarse hash lookup (always available)
//! - `tantivy`: one tantivy index per partition (`fulltext-tantivy` feature)

mod merge;
mod reader;

pub use merge::MergedIds;
pub use reader::PartitionedReader;

use crate::error::{IndexError, ReleaseFailure, Result};
use crate::query::IndexQuery;
use crate::sampling::IndexSampler;
use crate::types::{EntityId, IndexDescriptor};
use crate::value::{same_tuple, Value, ValueTuple};
use std::path::Path;
use tracing::warn;

/// Lazy, ascending, duplicate-free stream of entity ids.
pub type EntityIds<'a> = Box<dyn Iterator<Item = EntityId> + Send + 'a>;

/// Point-in-time view of one partition.
pub trait PartitionSearcher: Send + Sync {
    /// Candidate ids for `query` against value slot `slot`, ascending.
    ///
    /// Exact queries may return a superset (entities whose value shares the
    /// coarse key); the reader re-validates those with `stored_values`.
    fn search(&self, slot: usize, query: &IndexQuery) -> Result<EntityIds<'_>>;

    /// Every value tuple this partition holds for `entity`.
    fn stored_values(&self, entity: EntityId) -> Result<Vec<ValueTuple>>;

    /// Feed every stored entry to `sampler`.
    fn sample_into(&self, sampler: &mut dyn IndexSampler) -> Result<()>;

    /// Release the view. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Physical write unit of a partition.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionOp {
    /// Add the entry; `false` if it was already present
    Insert { entity: EntityId, values: ValueTuple },
    /// Remove the exact entry; `false` if absent
    Delete { entity: EntityId, values: ValueTuple },
    /// Remove every entry of the entity; `false` if it had none
    DeleteEntity { entity: EntityId },
}

pub trait IndexPartition: Send + Sync {
    type Searcher: PartitionSearcher + 'static;

    /// Position of this partition within its logical index.
    fn ordinal(&self) -> usize;

    /// Acquire a searcher over everything applied before the last `refresh`.
    fn acquire_searcher(&self) -> Result<Self::Searcher>;

    /// Apply one write. Returns whether anything changed.
    fn apply(&self, op: &PartitionOp) -> Result<bool>;

    /// Bulk insert. Returns how many entries were new.
    fn insert_batch(&self, entries: Vec<(EntityId, ValueTuple)>) -> Result<usize> {
        let mut inserted = 0;
        for (entity, values) in entries {
            if self.apply(&PartitionOp::Insert { entity, values })? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Tuples held for `entity`, including writes not yet refreshed.
    fn values_of(&self, entity: EntityId) -> Result<Vec<ValueTuple>>;

    /// Whether the partition holds exactly this entry, including writes
    /// not yet refreshed.
    fn contains(&self, entity: EntityId, values: &[Value]) -> Result<bool> {
        Ok(self
            .values_of(entity)?
            .iter()
            .any(|stored| same_tuple(stored, values)))
    }

    /// Entries held, including writes not yet refreshed.
    fn entry_count(&self) -> u64;

    /// Make applied writes visible to newly acquired searchers.
    fn refresh(&self) -> Result<()>;

    /// Persist applied writes.
    fn flush(&self) -> Result<()>;

    /// Flush and release. Searchers already handed out stay usable.
    fn close(&self) -> Result<()>;
}

/// Factory for partitions of one backend flavour.
pub trait PartitionBackend: Send + Sync + 'static {
    type Partition: IndexPartition + 'static;

    /// Provider key, also the name of the provider's directory.
    fn name(&self) -> &'static str;

    fn version(&self) -> &'static str;

    /// Create an empty partition in `dir`, replacing whatever is there.
    fn create_partition(
        &self,
        dir: &Path,
        ordinal: usize,
        descriptor: &IndexDescriptor,
    ) -> Result<Self::Partition>;

    /// Open an existing partition in `dir`.
    fn open_partition(
        &self,
        dir: &Path,
        ordinal: usize,
        descriptor: &IndexDescriptor,
    ) -> Result<Self::Partition>;
}

/// Run every release, collecting failures instead of stopping at the first.
pub fn release_all<I>(results: I) -> Result<()>
where
    I: IntoIterator<Item = (usize, Result<()>)>,
{
    let mut total = 0;
    let mut failures = Vec::new();
    for (partition, result) in results {
        total += 1;
        if let Err(e) = result {
            warn!(partition, error = %e, "failed to release partition");
            failures.push(ReleaseFailure {
                partition,
                reason: e.to_string(),
            });
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(IndexError::PartitionRelease { total, failures })
    }
}
