use super::provider::BuildGuard;
use super::updater::PartitionedUpdater;
use super::{AppliedChanges, PartitionedIndex};
use crate::config::IndexSamplingConfig;
use crate::error::{IndexError, Result};
use crate::partition::PartitionBackend;
use crate::sampling::{sampler_for, IndexSample, IndexSampler};
use crate::state::IndexStateStore;
use crate::traits::{IndexPopulator, IndexUpdater};
use crate::types::{IndexDescriptor, IndexId};
use crate::update::{IndexEntryUpdate, PropertyAccessor, UpdateKind};
use dashmap::DashSet;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Building,
    Closed,
    Dropped,
}

/// Sampler shared by bulk ingestion and the populating updaters.
pub(crate) struct PopulationSampler {
    enabled: AtomicBool,
    sampler: Mutex<Box<dyn IndexSampler>>,
}

impl PopulationSampler {
    fn new(descriptor: &IndexDescriptor, config: &IndexSamplingConfig) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            sampler: Mutex::new(sampler_for(descriptor, config)),
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn reset(&self, descriptor: &IndexDescriptor, config: &IndexSamplingConfig) {
        *self.sampler.lock() = sampler_for(descriptor, config);
    }

    pub(crate) fn record(&self, changes: &AppliedChanges) {
        if !self.is_enabled() {
            return;
        }
        let mut sampler = self.sampler.lock();
        for values in &changes.removed {
            sampler.exclude(values);
        }
        for values in &changes.added {
            sampler.include(values);
        }
    }
}

/// Builds one index into a fresh directory.
pub struct PartitionedPopulator<B: PartitionBackend> {
    id: IndexId,
    descriptor: IndexDescriptor,
    backend: Arc<B>,
    dir: PathBuf,
    max_entries: u64,
    state: Arc<IndexStateStore>,
    building: Arc<DashSet<IndexId>>,
    guard: Option<BuildGuard>,
    phase: Phase,
    index: Option<PartitionedIndex<B>>,
    failure: Mutex<Option<String>>,
    sampling: IndexSamplingConfig,
    sampler: PopulationSampler,
}

impl<B: PartitionBackend> PartitionedPopulator<B> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: IndexId,
        descriptor: &IndexDescriptor,
        sampling: &IndexSamplingConfig,
        backend: Arc<B>,
        dir: PathBuf,
        max_entries: u64,
        state: Arc<IndexStateStore>,
        building: Arc<DashSet<IndexId>>,
        guard: BuildGuard,
    ) -> Self {
        Self {
            id,
            descriptor: descriptor.clone(),
            backend,
            dir,
            max_entries,
            state,
            building,
            guard: Some(guard),
            phase: Phase::Created,
            index: None,
            failure: Mutex::new(None),
            sampling: *sampling,
            sampler: PopulationSampler::new(descriptor, sampling),
        }
    }

    fn building_index(&self) -> Result<&PartitionedIndex<B>> {
        match (&self.phase, &self.index) {
            (Phase::Building, Some(index)) => Ok(index),
            _ => Err(IndexError::NotBuilding(self.id)),
        }
    }

    fn is_failed(&self) -> bool {
        self.failure.lock().is_some()
    }

    /// Close (and for a failed build, discard) the index built so far.
    fn finish(&mut self, populated_successfully: bool) -> Result<()> {
        let failed = self.is_failed();
        let Some(index) = self.index.as_ref() else {
            return Ok(());
        };
        if populated_successfully {
            index.close()?;
            if failed {
                info!(index_id = self.id, "population closed after failure");
                return Ok(());
            }
            let state = self.state.set_online(self.id)?;
            info!(
                index_id = self.id,
                state = %state,
                entries = index.entry_count(),
                partitions = index.partition_count(),
                "population finished"
            );
            return Ok(());
        }

        let closed = index.close();
        self.index = None;
        PartitionedIndex::<B>::destroy(&self.dir)?;
        info!(index_id = self.id, failed, "population discarded");
        closed
    }
}

impl<B: PartitionBackend> IndexPopulator for PartitionedPopulator<B> {
    fn create(&mut self) -> Result<()> {
        match self.phase {
            Phase::Created | Phase::Dropped => {}
            Phase::Building | Phase::Closed => return Err(IndexError::AlreadyCreated(self.id)),
        }
        if self.guard.is_none() {
            self.guard = Some(BuildGuard::acquire(&self.building, self.id)?);
        }
        let index = PartitionedIndex::create(
            self.id,
            Arc::clone(&self.backend),
            &self.dir,
            &self.descriptor,
            self.max_entries,
        )?;
        self.state.set_populating(self.id)?;
        *self.failure.lock() = None;
        self.sampler.reset(&self.descriptor, &self.sampling);
        self.index = Some(index);
        self.phase = Phase::Building;
        info!(index_id = self.id, index = %self.descriptor, "population started");
        Ok(())
    }

    fn drop_index(&mut self) -> Result<()> {
        if let Some(index) = self.index.take() {
            if let Err(e) = index.close() {
                debug!(index_id = self.id, error = %e, "ignoring close failure while dropping");
            }
        }
        PartitionedIndex::<B>::destroy(&self.dir)?;
        self.state.remove(self.id)?;
        *self.failure.lock() = None;
        self.guard = None;
        self.phase = Phase::Dropped;
        info!(index_id = self.id, "index dropped");
        Ok(())
    }

    fn add(&self, updates: &[IndexEntryUpdate]) -> Result<()> {
        let index = self.building_index()?;
        if self.is_failed() {
            return Ok(());
        }
        let schema = self.descriptor.schema();
        let mut entries = Vec::with_capacity(updates.len());
        for update in updates {
            let fault = match (update.validate_for(schema), &update.kind) {
                (Err(e), _) => Some(e.to_string()),
                (Ok(()), UpdateKind::Add(values)) => {
                    entries.push((update.entity_id, values.clone()));
                    None
                }
                (Ok(()), other) => Some(format!(
                    "population accepts only additions, got {} for entity {}",
                    kind_name(other),
                    update.entity_id
                )),
            };
            if let Some(description) = fault {
                return self.mark_as_failed(&description);
            }
        }
        let changes = index.add_batch(entries)?;
        self.sampler.record(&changes);
        debug!(
            index_id = self.id,
            batch = updates.len(),
            inserted = changes.added.len(),
            "population batch added"
        );
        Ok(())
    }

    fn new_populating_updater(
        &self,
        property_accessor: Arc<dyn PropertyAccessor>,
    ) -> Result<Box<dyn IndexUpdater + '_>> {
        let index = self.building_index()?;
        Ok(Box::new(PartitionedUpdater::populating(
            index,
            property_accessor,
            &self.sampler,
        )))
    }

    fn configure_sampling(&self, enabled: bool) {
        self.sampler.enabled.store(enabled, Ordering::Release);
    }

    fn include_sample(&self, update: &IndexEntryUpdate) {
        if !self.sampler.is_enabled() {
            return;
        }
        let mut sampler = self.sampler.sampler.lock();
        if let Some(values) = update.values_before() {
            sampler.exclude(values);
        }
        if let Some(values) = update.values_after() {
            sampler.include(values);
        }
    }

    fn sample_result(&self) -> IndexSample {
        self.sampler.sampler.lock().result()
    }

    fn mark_as_failed(&self, description: &str) -> Result<()> {
        self.state.set_failed(self.id, description)?;
        *self.failure.lock() = Some(description.to_string());
        warn!(index_id = self.id, failure = description, "index population failed");
        Ok(())
    }

    fn close(&mut self, populated_successfully: bool) -> Result<()> {
        match self.phase {
            Phase::Building => {}
            Phase::Closed | Phase::Dropped => return Ok(()),
            Phase::Created if !populated_successfully => {
                // Nothing was built; only the build claim is released.
                self.phase = Phase::Closed;
                self.guard = None;
                debug!(index_id = self.id, "populator closed before create");
                return Ok(());
            }
            Phase::Created => return Err(IndexError::NotBuilding(self.id)),
        }
        self.phase = Phase::Closed;
        let result = self.finish(populated_successfully);
        self.guard = None;
        result
    }

    fn conflicts(&self) -> u64 {
        self.index.as_ref().map(|index| index.conflicts()).unwrap_or(0)
    }
}

impl<B: PartitionBackend> Drop for PartitionedPopulator<B> {
    fn drop(&mut self) {
        if self.phase == Phase::Building {
            if let Some(index) = self.index.as_ref() {
                if let Err(e) = index.close() {
                    warn!(index_id = self.id, error = %e, "populator dropped while building");
                }
            }
        }
    }
}

fn kind_name(kind: &UpdateKind) -> &'static str {
    match kind {
        UpdateKind::Add(_) => "ADD",
        UpdateKind::Change { .. } => "CHANGE",
        UpdateKind::Remove(_) => "REMOVE",
        UpdateKind::Touched => "TOUCHED",
    }
}
