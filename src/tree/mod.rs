//! Tree backend
//!
//! Sorted posting lists for ordered queries plus a coarse hash lookup for
//! equality, one pair per value slot.
//!
//! Design:
//! - HashIndex: O(1) equality candidates (coarse key)
//! - RangeIndex: sorted vectors (cache-friendly), class-contiguous
//! - Copy-on-write snapshots: readers never block writers
//! - Batch indexing mode for population

mod hash_index;
mod partition;
mod postings;
mod range_index;

pub use partition::{TreePartition, TreeSearcher};

use crate::config::IndexConfig;
use crate::error::Result;
use crate::partition::PartitionBackend;
use crate::partitioned::PartitionedIndexProvider;
use crate::types::IndexDescriptor;
use std::path::Path;

/// Provider over tree partitions.
pub type TreeIndexProvider = PartitionedIndexProvider<TreeBackend>;

#[derive(Debug, Clone, Copy, Default)]
pub struct TreeBackend;

impl PartitionBackend for TreeBackend {
    type Partition = TreePartition;

    fn name(&self) -> &'static str {
        "tree"
    }

    fn version(&self) -> &'static str {
        "1.0"
    }

    fn create_partition(&self, dir: &Path, ordinal: usize, descriptor: &IndexDescriptor) -> Result<TreePartition> {
        TreePartition::create(dir, ordinal, descriptor.schema().arity())
    }

    fn open_partition(&self, dir: &Path, ordinal: usize, descriptor: &IndexDescriptor) -> Result<TreePartition> {
        TreePartition::open(dir, ordinal, descriptor.schema().arity())
    }
}

impl TreeIndexProvider {
    /// Open the tree provider rooted at `config.root`.
    pub fn open(config: &IndexConfig) -> Result<Self> {
        Self::new(TreeBackend, config)
    }
}
