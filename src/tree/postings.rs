//! In-memory postings of one tree partition.
//!
//! Per value slot a `RangeIndex` (ordered queries) and a `HashIndex`
//! (equality), plus a reverse map entity → stored tuples that is also the
//! persisted form.

use super::hash_index::HashIndex;
use super::range_index::{Entry, RangeIndex};
use crate::partition::EntityIds;
use crate::query::IndexQuery;
use crate::sampling::IndexSampler;
use crate::types::EntityId;
use crate::value::{same_tuple, Value, ValueClass, ValueTuple};
use smallvec::SmallVec;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
struct SlotIndex {
    range: RangeIndex,
    hash: HashIndex,
}

#[derive(Debug, Clone)]
pub struct PostingStore {
    slots: Vec<SlotIndex>,
    /// Ordered by entity, so existence scans stream without sorting
    entries: BTreeMap<EntityId, SmallVec<[ValueTuple; 1]>>,
    len: u64,
}

impl PostingStore {
    pub fn new(arity: usize) -> Self {
        Self {
            slots: vec![SlotIndex::default(); arity],
            entries: BTreeMap::new(),
            len: 0,
        }
    }

    /// Rebuild from persisted entries.
    pub fn from_entries(arity: usize, entries: Vec<(EntityId, Vec<ValueTuple>)>) -> Self {
        let mut store = Self::new(arity);
        store.insert_batch(
            entries
                .into_iter()
                .flat_map(|(entity, tuples)| tuples.into_iter().map(move |t| (entity, t)))
                .collect(),
        );
        store
    }

    /// Persisted form, sorted by entity.
    pub fn to_entries(&self) -> Vec<(EntityId, Vec<ValueTuple>)> {
        self.entries
            .iter()
            .map(|(entity, tuples)| (*entity, tuples.to_vec()))
            .collect()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, entity: EntityId, values: &[Value]) -> bool {
        self.entries
            .get(&entity)
            .is_some_and(|tuples| tuples.iter().any(|t| same_tuple(t, values)))
    }

    pub fn values_of(&self, entity: EntityId) -> Vec<ValueTuple> {
        self.entries
            .get(&entity)
            .map(|tuples| tuples.to_vec())
            .unwrap_or_default()
    }

    /// Returns `false` if the entry was already present.
    pub fn insert(&mut self, entity: EntityId, values: ValueTuple) -> bool {
        if values.len() != self.slots.len() || self.contains(entity, &values) {
            return false;
        }
        for (slot, value) in self.slots.iter_mut().zip(values.iter()) {
            slot.hash.insert(value.coarse_hash(), entity);
            slot.range.insert(value.clone(), entity);
        }
        self.entries.entry(entity).or_default().push(values);
        self.len += 1;
        true
    }

    /// Bulk insert: one sort per slot instead of one shift per entry.
    pub fn insert_batch(&mut self, entries: Vec<(EntityId, ValueTuple)>) -> usize {
        let mut accepted: Vec<(EntityId, ValueTuple)> = Vec::with_capacity(entries.len());
        for (entity, values) in entries {
            if values.len() != self.slots.len() || self.contains(entity, &values) {
                continue;
            }
            self.entries.entry(entity).or_default().push(values.clone());
            accepted.push((entity, values));
        }
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let batch: Vec<Entry> = accepted
                .iter()
                .map(|(entity, values)| {
                    slot.hash.insert(values[i].coarse_hash(), *entity);
                    Entry {
                        value: values[i].clone(),
                        entity: *entity,
                    }
                })
                .collect();
            slot.range.bulk_insert(batch);
        }
        self.len += accepted.len() as u64;
        accepted.len()
    }

    /// Remove the stored tuple equal to `values`. Returns `false` if absent.
    pub fn remove(&mut self, entity: EntityId, values: &[Value]) -> bool {
        let Some(tuples) = self.entries.get_mut(&entity) else {
            return false;
        };
        let Some(pos) = tuples.iter().position(|t| same_tuple(t, values)) else {
            return false;
        };
        let stored = tuples.remove(pos);
        if tuples.is_empty() {
            self.entries.remove(&entity);
        }
        self.unlink(entity, &stored);
        true
    }

    /// Remove every tuple of `entity`. Returns `false` if it had none.
    pub fn remove_entity(&mut self, entity: EntityId) -> bool {
        let Some(tuples) = self.entries.remove(&entity) else {
            return false;
        };
        for stored in &tuples {
            self.unlink(entity, stored);
        }
        true
    }

    fn unlink(&mut self, entity: EntityId, stored: &[Value]) {
        for (slot, value) in self.slots.iter_mut().zip(stored) {
            slot.hash.remove(value.coarse_hash(), entity);
            slot.range.remove(value, entity);
        }
        self.len -= 1;
    }

    /// Candidate ids for `query` on `slot`, ascending and unique. Exact
    /// queries answer on the coarse key; everything else is filtered
    /// exactly. Existence streams straight off the entity map; the other
    /// kinds sort only their own hits.
    pub fn search(&self, slot: usize, query: &IndexQuery) -> EntityIds<'_> {
        let Some(index) = self.slots.get(slot) else {
            return Box::new(std::iter::empty());
        };
        match query {
            IndexQuery::Exists { .. } => Box::new(self.entries.keys().copied()),
            IndexQuery::Exact { value, .. } => {
                sorted(index.hash.lookup(value.coarse_hash()).to_vec())
            }
            IndexQuery::Range { lower, upper, .. } => {
                accepted(index.range.range_candidates(lower, upper), query)
            }
            IndexQuery::StringPrefix { prefix, .. } => {
                sorted(index.range.prefix_run(prefix).iter().map(|e| e.entity).collect())
            }
            IndexQuery::StringSuffix { .. } | IndexQuery::StringContains { .. } => {
                accepted(index.range.class_run(ValueClass::String), query)
            }
        }
    }

    pub fn sample_into(&self, sampler: &mut dyn IndexSampler) {
        for tuples in self.entries.values() {
            for values in tuples {
                sampler.include(values);
            }
        }
    }
}

fn accepted(entries: &[Entry], query: &IndexQuery) -> EntityIds<'static> {
    sorted(
        entries
            .iter()
            .filter(|e| query.accepts(&e.value))
            .map(|e| e.entity)
            .collect(),
    )
}

/// Value-ordered hits put back into entity order.
fn sorted(mut ids: Vec<EntityId>) -> EntityIds<'static> {
    ids.sort_unstable();
    ids.dedup();
    Box::new(ids.into_iter())
}
