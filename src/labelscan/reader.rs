use super::bitmap::LabelBitmapPartition;
use super::{LabelIds, LabelScanReader};
use crate::error::{IndexError, Result};
use crate::partition::{release_all, EntityIds, MergedIds};
use crate::types::{EntityId, LabelId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

/// Reads one label scan partition.
pub struct SimpleLabelScanReader {
    ordinal: usize,
    partition: Option<Arc<LabelBitmapPartition>>,
}

impl SimpleLabelScanReader {
    pub(crate) fn new(partition: Arc<LabelBitmapPartition>) -> Self {
        Self {
            ordinal: partition.ordinal(),
            partition: Some(partition),
        }
    }

    fn partition(&self) -> Result<&LabelBitmapPartition> {
        self.partition.as_deref().ok_or_else(|| IndexError::Partition {
            partition: self.ordinal,
            reason: "label scan reader is closed".into(),
        })
    }

    fn release(&mut self) -> Result<()> {
        self.partition = None;
        Ok(())
    }
}

impl LabelScanReader for SimpleLabelScanReader {
    fn entities_with_label(&self, label: LabelId) -> Result<EntityIds<'_>> {
        Ok(Box::new(self.partition()?.snapshot(label).into_iter()))
    }

    fn labels_for_entity(&self, entity: EntityId) -> Result<LabelIds<'_>> {
        Ok(Box::new(self.partition()?.labels_of(entity).into_iter()))
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.release()
    }
}

/// Reads several label scan partitions as one.
pub struct PartitionedLabelScanReader {
    readers: Vec<SimpleLabelScanReader>,
    closed: bool,
}

impl PartitionedLabelScanReader {
    pub(crate) fn new(readers: Vec<SimpleLabelScanReader>) -> Self {
        Self { readers, closed: false }
    }

    pub fn partition_count(&self) -> usize {
        self.readers.len()
    }

    fn release(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        release_all(self.readers.iter_mut().map(|r| (r.ordinal, r.release())))
    }
}

impl LabelScanReader for PartitionedLabelScanReader {
    fn entities_with_label(&self, label: LabelId) -> Result<EntityIds<'_>> {
        let sources = self
            .readers
            .iter()
            .map(|r| r.entities_with_label(label))
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(MergedIds::new(sources)))
    }

    fn labels_for_entity(&self, entity: EntityId) -> Result<LabelIds<'_>> {
        let mut labels = BTreeSet::new();
        for reader in &self.readers {
            labels.extend(reader.labels_for_entity(entity)?);
        }
        Ok(Box::new(labels.into_iter()))
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.release()
    }
}

impl Drop for PartitionedLabelScanReader {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "label scan reader dropped with release errors");
        }
    }
}
