//! K-way merge of ascending id streams.

use super::EntityIds;
use crate::types::EntityId;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Merges ascending per-partition streams into one ascending stream, each
/// id once. Holds at most one pending id per source.
pub struct MergedIds<'a> {
    sources: Vec<EntityIds<'a>>,
    heap: BinaryHeap<Reverse<(EntityId, usize)>>,
    last: Option<EntityId>,
}

impl<'a> MergedIds<'a> {
    pub fn new(mut sources: Vec<EntityIds<'a>>) -> Self {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (i, source) in sources.iter_mut().enumerate() {
            if let Some(id) = source.next() {
                heap.push(Reverse((id, i)));
            }
        }
        Self {
            sources,
            heap,
            last: None,
        }
    }
}

impl Iterator for MergedIds<'_> {
    type Item = EntityId;

    fn next(&mut self) -> Option<EntityId> {
        while let Some(Reverse((id, source))) = self.heap.pop() {
            if let Some(next) = self.sources[source].next() {
                self.heap.push(Reverse((next, source)));
            }
            if self.last == Some(id) {
                continue;
            }
            self.last = Some(id);
            return Some(id);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn source(ids: Vec<EntityId>) -> EntityIds<'static> {
        Box::new(ids.into_iter())
    }

    #[test]
    fn test_merge_interleaves_and_dedups() {
        let merged: Vec<_> = MergedIds::new(vec![
            source(vec![1, 4, 9]),
            source(vec![]),
            source(vec![2, 4, 10]),
            source(vec![4]),
        ])
        .collect();
        assert_eq!(merged, vec![1, 2, 4, 9, 10]);
    }

    #[test]
    fn test_merge_nothing() {
        assert_eq!(MergedIds::new(Vec::new()).count(), 0);
    }

    proptest! {
        #[test]
        fn merge_equals_sorted_union(sets in prop::collection::vec(
            prop::collection::btree_set(0u64..500, 0..40), 0..6)
        ) {
            let expected: BTreeSet<EntityId> = sets.iter().flatten().copied().collect();
            let sources = sets
                .into_iter()
                .map(|s| source(s.into_iter().collect()))
                .collect();
            let merged: Vec<_> = MergedIds::new(sources).collect();
            prop_assert_eq!(merged, expected.into_iter().collect::<Vec<_>>());
        }
    }
}
