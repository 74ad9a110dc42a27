//! Label scan: which nodes carry a label, and which labels a node carries.
//!
//! Nodes are partitioned by id range; each partition keeps one roaring
//! bitmap per label.

mod bitmap;
mod reader;
mod store;

pub use bitmap::LabelBitmapPartition;
pub use reader::{PartitionedLabelScanReader, SimpleLabelScanReader};
pub use store::LabelScanStore;

use crate::error::Result;
use crate::partition::EntityIds;
use crate::types::{EntityId, LabelId};

/// Label change of one node, as committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLabelUpdate {
    pub node: EntityId,
    pub labels_before: Vec<LabelId>,
    pub labels_after: Vec<LabelId>,
}

impl NodeLabelUpdate {
    pub fn new(node: EntityId, labels_before: &[LabelId], labels_after: &[LabelId]) -> Self {
        Self {
            node,
            labels_before: labels_before.to_vec(),
            labels_after: labels_after.to_vec(),
        }
    }

    /// Labels present after but not before.
    pub fn added(&self) -> impl Iterator<Item = LabelId> + '_ {
        self.labels_after
            .iter()
            .copied()
            .filter(|l| !self.labels_before.contains(l))
    }

    /// Labels present before but not after.
    pub fn removed(&self) -> impl Iterator<Item = LabelId> + '_ {
        self.labels_before
            .iter()
            .copied()
            .filter(|l| !self.labels_after.contains(l))
    }
}

/// Labels of one node, ascending.
pub type LabelIds<'a> = Box<dyn Iterator<Item = LabelId> + Send + 'a>;

/// Reads label membership. Must be closed (or dropped) to release it.
pub trait LabelScanReader: Send {
    /// Nodes carrying `label`, ascending.
    fn entities_with_label(&self, label: LabelId) -> Result<EntityIds<'_>>;

    /// Labels of `entity`, ascending.
    fn labels_for_entity(&self, entity: EntityId) -> Result<LabelIds<'_>>;

    fn close(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_diff() {
        let update = NodeLabelUpdate::new(1, &[1, 2, 3], &[2, 4]);
        assert_eq!(update.added().collect::<Vec<_>>(), vec![4]);
        assert_eq!(update.removed().collect::<Vec<_>>(), vec![1, 3]);
    }
}
