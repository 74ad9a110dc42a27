//! Range Index for O(log n) Range Queries
//!
//! Cache-friendly sorted array with binary search. Entries are ordered by
//! `Value::index_cmp` and then by entity, so every class (bool, number,
//! string) occupies one contiguous run.

use crate::query::IndexQuery;
use crate::types::EntityId;
use crate::value::{Value, ValueClass};
use rayon::slice::ParallelSliceMut;
use std::cmp::Ordering;
use std::ops::Bound;

/// Batches above this size are sorted in parallel
const PARALLEL_SORT_THRESHOLD: usize = 16_384;

/// Entry in the sorted index
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    pub entity: EntityId,
}

impl Entry {
    fn cmp_key(&self, value: &Value, entity: EntityId) -> Ordering {
        self.value
            .index_cmp(value)
            .then_with(|| self.entity.cmp(&entity))
    }
}

/// Range index using sorted array + binary search
#[derive(Debug, Clone, Default)]
pub struct RangeIndex {
    data: Vec<Entry>,
}

impl RangeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn insert(&mut self, value: Value, entity: EntityId) {
        let pos = self.data.partition_point(|e| e.cmp_key(&value, entity) == Ordering::Less);
        self.data.insert(pos, Entry { value, entity });
    }

    /// Remove one entry holding exactly this representation of `value`.
    pub fn remove(&mut self, value: &Value, entity: EntityId) -> bool {
        let pos = self.data.partition_point(|e| e.cmp_key(value, entity) == Ordering::Less);
        match self.data.get(pos) {
            Some(e) if e.cmp_key(value, entity) == Ordering::Equal => {
                self.data.remove(pos);
                true
            }
            _ => false,
        }
    }

    /// Bulk insert with single sort (faster for batch loading)
    pub fn bulk_insert(&mut self, mut entries: Vec<Entry>) {
        let by_key = |a: &Entry, b: &Entry| a.cmp_key(&b.value, b.entity);
        if entries.len() >= PARALLEL_SORT_THRESHOLD {
            entries.par_sort_by(by_key);
        } else {
            entries.sort_by(by_key);
        }

        // Merge with existing data
        let existing = std::mem::take(&mut self.data);
        let mut merged: Vec<Entry> = Vec::with_capacity(existing.len() + entries.len());
        let mut old = existing.into_iter().peekable();
        let mut new = entries.into_iter().peekable();
        loop {
            let take_old = match (old.peek(), new.peek()) {
                (Some(a), Some(b)) => by_key(a, b) != Ordering::Greater,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_old { old.next() } else { new.next() };
            merged.extend(next);
        }
        self.data = merged;
    }

    /// The contiguous run of values of one class.
    pub fn class_run(&self, class: ValueClass) -> &[Entry] {
        let start = self.data.partition_point(|e| e.value.class() < class);
        let end = self.data.partition_point(|e| e.value.class() <= class);
        &self.data[start..end]
    }

    /// Candidate entries for a range query. Open ends are limited to the
    /// class of the other bound; both ends open cover numbers and strings.
    pub fn range_candidates(&self, lower: &Bound<Value>, upper: &Bound<Value>) -> &[Entry] {
        match IndexQuery::range_class(lower, upper) {
            None => &[],
            Some(Some(class)) => {
                let run = self.class_run(class);
                let start = match lower {
                    Bound::Included(lo) | Bound::Excluded(lo) => {
                        run.partition_point(|e| e.value.coarse_cmp(lo) == Ordering::Less)
                    }
                    Bound::Unbounded => 0,
                };
                let end = match upper {
                    Bound::Included(hi) | Bound::Excluded(hi) => {
                        run.partition_point(|e| e.value.coarse_cmp(hi) != Ordering::Greater)
                    }
                    Bound::Unbounded => run.len(),
                };
                if start >= end {
                    &[]
                } else {
                    &run[start..end]
                }
            }
            Some(None) => {
                let start = self.data.partition_point(|e| e.value.class() < ValueClass::Number);
                &self.data[start..]
            }
        }
    }

    /// Strings starting with `prefix`.
    pub fn prefix_run(&self, prefix: &str) -> &[Entry] {
        let run = self.class_run(ValueClass::String);
        let start = run.partition_point(|e| e.value.as_str().is_some_and(|s| s < prefix));
        let len = run[start..]
            .iter()
            .take_while(|e| e.value.as_str().is_some_and(|s| s.starts_with(prefix)))
            .count();
        &run[start..start + len]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.data.iter()
    }
}
