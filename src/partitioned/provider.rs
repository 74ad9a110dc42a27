use super::{PartitionedAccessor, PartitionedIndex, PartitionedPopulator};
use crate::config::{IndexConfig, IndexSamplingConfig};
use crate::error::{IndexError, Result};
use crate::partition::PartitionBackend;
use crate::provider::ProviderDescriptor;
use crate::state::{IndexStateStore, InternalIndexState};
use crate::traits::{IndexAccessor, IndexPopulator, SchemaIndexProvider};
use crate::types::{IndexDescriptor, IndexId};
use dashmap::DashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Marks an index as being built. Released on drop.
pub(crate) struct BuildGuard {
    building: Arc<DashSet<IndexId>>,
    id: IndexId,
}

impl BuildGuard {
    pub(crate) fn acquire(building: &Arc<DashSet<IndexId>>, id: IndexId) -> Result<Self> {
        if !building.insert(id) {
            return Err(IndexError::PopulationInProgress(id));
        }
        Ok(Self {
            building: Arc::clone(building),
            id,
        })
    }
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        self.building.remove(&self.id);
    }
}

/// Schema index provider over partitions of backend `B`.
///
/// # Disk layout
/// ```text
/// {root}/{key}/index-states.bin
/// {root}/{key}/{index id}/{partition ordinal}/...
/// ```
pub struct PartitionedIndexProvider<B: PartitionBackend> {
    backend: Arc<B>,
    descriptor: ProviderDescriptor,
    root: PathBuf,
    max_entries: u64,
    state: Arc<IndexStateStore>,
    building: Arc<DashSet<IndexId>>,
}

impl<B: PartitionBackend> PartitionedIndexProvider<B> {
    pub fn new(backend: B, config: &IndexConfig) -> Result<Self> {
        let root = config.root.join(backend.name());
        let state = IndexStateStore::open(&root)?;
        debug!(provider = backend.name(), root = %root.display(), "opened index provider");
        Ok(Self {
            descriptor: ProviderDescriptor::new(backend.name(), backend.version()),
            backend: Arc::new(backend),
            root,
            max_entries: config.max_entries_per_partition,
            state: Arc::new(state),
            building: Arc::new(DashSet::new()),
        })
    }

    /// Directory holding this provider's state file and indexes.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_dir(&self, id: IndexId) -> PathBuf {
        self.root.join(id.to_string())
    }

    pub fn state_store(&self) -> &IndexStateStore {
        &self.state
    }
}

impl<B: PartitionBackend> SchemaIndexProvider for PartitionedIndexProvider<B> {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn get_populator(
        &self,
        id: IndexId,
        descriptor: &IndexDescriptor,
        sampling: &IndexSamplingConfig,
    ) -> Result<Box<dyn IndexPopulator>> {
        let guard = BuildGuard::acquire(&self.building, id)?;
        Ok(Box::new(PartitionedPopulator::new(
            id,
            descriptor,
            sampling,
            Arc::clone(&self.backend),
            self.index_dir(id),
            self.max_entries,
            Arc::clone(&self.state),
            Arc::clone(&self.building),
            guard,
        )))
    }

    fn get_online_accessor(
        &self,
        id: IndexId,
        descriptor: &IndexDescriptor,
        sampling: &IndexSamplingConfig,
    ) -> Result<Box<dyn IndexAccessor>> {
        if self.building.contains(&id) {
            return Err(IndexError::PopulationInProgress(id));
        }
        let actual = self.get_initial_state(id, descriptor);
        if actual != InternalIndexState::Online {
            return Err(IndexError::InvalidState {
                id,
                actual,
                expected: InternalIndexState::Online,
            });
        }
        let index = PartitionedIndex::open(
            id,
            Arc::clone(&self.backend),
            &self.index_dir(id),
            descriptor,
            self.max_entries,
        )?;
        Ok(Box::new(PartitionedAccessor::new(index, Arc::clone(&self.state), sampling)))
    }

    fn get_initial_state(&self, id: IndexId, _descriptor: &IndexDescriptor) -> InternalIndexState {
        self.state.state(id).unwrap_or(InternalIndexState::Populating)
    }

    fn get_population_failure(&self, id: IndexId) -> Result<String> {
        self.state.failure(id).ok_or(IndexError::NoFailureRecorded(id))
    }
}
