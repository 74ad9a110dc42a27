use super::bitmap::LabelBitmapPartition;
use super::reader::{PartitionedLabelScanReader, SimpleLabelScanReader};
use super::{LabelScanReader, NodeLabelUpdate};
use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::partition::release_all;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Partitioned label membership store.
///
/// # Disk layout
/// ```text
/// {root}/labelscan/{ordinal}/{label:08x}.rbm
/// ```
/// Partition `n` holds nodes `n * nodes_per_partition ..
/// (n + 1) * nodes_per_partition`. Only partitions that hold nodes exist.
///
/// Dirty bitmaps are written by `flush`, `close` and on drop.
pub struct LabelScanStore {
    dir: PathBuf,
    nodes_per_partition: u64,
    partitions: RwLock<BTreeMap<usize, Arc<LabelBitmapPartition>>>,
}

impl LabelScanStore {
    /// Open the store under `config.root/labelscan`.
    pub fn open(config: &IndexConfig) -> Result<Self> {
        Self::open_in(&config.root.join("labelscan"), config.nodes_per_label_partition)
    }

    pub fn open_in(dir: &Path, nodes_per_partition: u64) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let mut partitions = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(ordinal) = entry.file_name().to_str().and_then(|n| n.parse::<usize>().ok()) else {
                continue;
            };
            partitions.insert(ordinal, Arc::new(LabelBitmapPartition::open(&entry.path(), ordinal)?));
        }
        info!(partitions = partitions.len(), dir = %dir.display(), "opened label scan store");
        Ok(Self {
            dir: dir.to_path_buf(),
            nodes_per_partition: nodes_per_partition.max(1),
            partitions: RwLock::new(partitions),
        })
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.read().len()
    }

    /// Apply a batch of committed label changes.
    pub fn apply(&self, updates: &[NodeLabelUpdate]) -> Result<()> {
        for update in updates {
            let partition = self.partition_for(update.node)?;
            for label in update.removed() {
                partition.remove(label, update.node);
            }
            for label in update.added() {
                partition.insert(label, update.node);
            }
        }
        debug!(batch = updates.len(), "label scan updates applied");
        Ok(())
    }

    /// Partition owning `node`, opened on first use.
    fn partition_for(&self, node: u64) -> Result<Arc<LabelBitmapPartition>> {
        let ordinal = usize::try_from(node / self.nodes_per_partition)
            .map_err(|_| IndexError::InvalidUpdate(format!("node {node} out of range")))?;
        if let Some(partition) = self.partitions.read().get(&ordinal) {
            return Ok(Arc::clone(partition));
        }
        let mut partitions = self.partitions.write();
        if let Some(partition) = partitions.get(&ordinal) {
            return Ok(Arc::clone(partition));
        }
        let partition = Arc::new(LabelBitmapPartition::open(&self.dir.join(ordinal.to_string()), ordinal)?);
        partitions.insert(ordinal, Arc::clone(&partition));
        debug!(partition = ordinal, "label scan partition added");
        Ok(partition)
    }

    /// Reader over the current partitions; a single partition gets the
    /// simple reader.
    pub fn new_reader(&self) -> Box<dyn LabelScanReader> {
        let partitions = self.partitions.read();
        let mut readers: Vec<SimpleLabelScanReader> = partitions
            .values()
            .map(|p| SimpleLabelScanReader::new(Arc::clone(p)))
            .collect();
        if readers.len() == 1 {
            if let Some(reader) = readers.pop() {
                return Box::new(reader);
            }
        }
        Box::new(PartitionedLabelScanReader::new(readers))
    }

    pub fn flush(&self) -> Result<()> {
        let partitions = self.partitions.read();
        release_all(partitions.values().map(|p| (p.ordinal(), p.flush())))
    }

    /// Flush and release the store.
    pub fn close(self) -> Result<()> {
        let flushed = self.flush();
        info!(dir = %self.dir.display(), "closed label scan store");
        flushed
    }
}

impl Drop for LabelScanStore {
    fn drop(&mut self) {
        let dirty = self.partitions.read().values().any(|p| p.is_dirty());
        if dirty {
            if let Err(e) = self.flush() {
                warn!(error = %e, dir = %self.dir.display(), "label scan store dropped with unsaved changes");
            }
        }
    }
}
