use super::populator::PopulationSampler;
use super::PartitionedIndex;
use crate::error::Result;
use crate::partition::PartitionBackend;
use crate::traits::IndexUpdater;
use crate::update::{IndexEntryUpdate, PropertyAccessor};
use std::mem;
use std::sync::Arc;
use tracing::debug;

/// Stages updates and applies them to the index on `close`.
///
/// Dropping an updater without closing it discards what was staged.
pub(crate) struct PartitionedUpdater<'a, B: PartitionBackend> {
    index: &'a PartitionedIndex<B>,
    lookup: Option<Arc<dyn PropertyAccessor>>,
    sampler: Option<&'a PopulationSampler>,
    pending: Vec<IndexEntryUpdate>,
    closed: bool,
}

impl<'a, B: PartitionBackend> PartitionedUpdater<'a, B> {
    /// Updater for an online index; key-only updates are absorbed.
    pub fn online(index: &'a PartitionedIndex<B>) -> Self {
        Self {
            index,
            lookup: None,
            sampler: None,
            pending: Vec::new(),
            closed: false,
        }
    }

    /// Updater running alongside population.
    pub fn populating(
        index: &'a PartitionedIndex<B>,
        lookup: Arc<dyn PropertyAccessor>,
        sampler: &'a PopulationSampler,
    ) -> Self {
        Self {
            index,
            lookup: Some(lookup),
            sampler: Some(sampler),
            pending: Vec::new(),
            closed: false,
        }
    }
}

impl<B: PartitionBackend> IndexUpdater for PartitionedUpdater<'_, B> {
    fn process(&mut self, update: IndexEntryUpdate) -> Result<()> {
        update.validate_for(self.index.descriptor().schema())?;
        self.pending.push(update);
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.closed = true;
        let pending = mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(());
        }
        let changes = self.index.apply(&pending, self.lookup.as_deref())?;
        if let Some(sampler) = self.sampler {
            sampler.record(&changes);
        }
        debug!(
            index_id = self.index.id(),
            updates = pending.len(),
            added = changes.added.len(),
            removed = changes.removed.len(),
            "updater closed"
        );
        Ok(())
    }
}

impl<B: PartitionBackend> Drop for PartitionedUpdater<'_, B> {
    fn drop(&mut self) {
        if !self.closed && !self.pending.is_empty() {
            debug!(
                index_id = self.index.id(),
                discarded = self.pending.len(),
                "updater dropped without close"
            );
        }
    }
}
