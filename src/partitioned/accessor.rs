use super::updater::PartitionedUpdater;
use super::PartitionedIndex;
use crate::config::IndexSamplingConfig;
use crate::error::{IndexError, Result};
use crate::partition::PartitionBackend;
use crate::state::IndexStateStore;
use crate::traits::{IndexAccessor, IndexReader, IndexUpdater};
use crate::types::IndexId;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Serves an ONLINE index.
pub struct PartitionedAccessor<B: PartitionBackend> {
    id: IndexId,
    index: PartitionedIndex<B>,
    state: Arc<IndexStateStore>,
    sampling: IndexSamplingConfig,
    closed: bool,
}

impl<B: PartitionBackend> PartitionedAccessor<B> {
    pub(crate) fn new(
        index: PartitionedIndex<B>,
        state: Arc<IndexStateStore>,
        sampling: &IndexSamplingConfig,
    ) -> Self {
        Self {
            id: index.id(),
            index,
            state,
            sampling: *sampling,
            closed: false,
        }
    }

    pub fn partition_count(&self) -> usize {
        self.index.partition_count()
    }

    pub fn entry_count(&self) -> u64 {
        self.index.entry_count()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(IndexError::Closed(self.id))
        } else {
            Ok(())
        }
    }
}

impl<B: PartitionBackend> IndexAccessor for PartitionedAccessor<B> {
    fn new_updater(&self) -> Result<Box<dyn IndexUpdater + '_>> {
        self.ensure_open()?;
        Ok(Box::new(PartitionedUpdater::online(&self.index)))
    }

    fn new_reader(&self) -> Result<Box<dyn IndexReader + '_>> {
        self.ensure_open()?;
        Ok(Box::new(self.index.new_reader(self.sampling)?))
    }

    fn force(&self) -> Result<()> {
        self.ensure_open()?;
        self.index.flush()
    }

    fn drop_index(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.index.close() {
                debug!(index_id = self.id, error = %e, "ignoring close failure while dropping");
            }
        }
        PartitionedIndex::<B>::destroy(self.index.dir())?;
        self.state.remove(self.id)?;
        info!(index_id = self.id, "index dropped");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.index.close()
    }

    fn conflicts(&self) -> u64 {
        self.index.conflicts()
    }
}

impl<B: PartitionBackend> Drop for PartitionedAccessor<B> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(index_id = self.id, error = %e, "accessor released with errors");
        }
    }
}
