//! Hash Index for O(1) Equality Lookups
//!
//! Keyed by the coarse value hash, so one bucket can hold entities whose
//! values only share the coarse key. Callers re-validate.

use crate::types::EntityId;
use ahash::AHashMap;
use smallvec::SmallVec;

/// Coarse hash → entity ids
#[derive(Debug, Clone, Default)]
pub struct HashIndex {
    /// value_hash -> entity ids, one per stored entry (duplicates allowed)
    buckets: AHashMap<u64, SmallVec<[EntityId; 4]>>,
    len: usize,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, hash: u64, entity: EntityId) {
        self.buckets.entry(hash).or_default().push(entity);
        self.len += 1;
    }

    /// Remove one occurrence of `entity` from the bucket.
    pub fn remove(&mut self, hash: u64, entity: EntityId) -> bool {
        let Some(ids) = self.buckets.get_mut(&hash) else {
            return false;
        };
        // Remove entity from vector (swap with last for O(1))
        let Some(pos) = ids.iter().position(|&x| x == entity) else {
            return false;
        };
        ids.swap_remove(pos);
        if ids.is_empty() {
            self.buckets.remove(&hash);
        }
        self.len -= 1;
        true
    }

    pub fn lookup(&self, hash: u64) -> &[EntityId] {
        self.buckets.get(&hash).map(|ids| ids.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
