//! Index sampling: cardinality statistics (entries vs distinct values).
//!
//! Sampling is advisory. Nothing here feeds back into query results.

use crate::config::IndexSamplingConfig;
use crate::types::IndexDescriptor;
use crate::value::tuple_hash;
use crate::value::Value;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSample {
    /// Entries currently in the index
    pub index_size: u64,
    /// Estimated distinct value tuples
    pub unique_values: u64,
    /// Entries the estimate is based on
    pub sample_size: u64,
}

impl IndexSample {
    /// Average number of entities per distinct value.
    pub fn selectivity(&self) -> f64 {
        if self.unique_values == 0 {
            0.0
        } else {
            self.sample_size as f64 / self.unique_values as f64
        }
    }
}

pub trait IndexSampler: Send {
    fn include(&mut self, values: &[Value]);
    fn exclude(&mut self, values: &[Value]);
    fn result(&self) -> IndexSample;
}

/// Counts distinct tuples in a bounded buffer. Once the buffer holds
/// `buffer_size` distinct tuples it is folded into the running totals and
/// cleared, so memory stays bounded and the estimate errs high.
pub struct NonUniqueIndexSampler {
    buffer_size: usize,
    values: AHashMap<u64, u64>,
    index_size: u64,
    folded_unique: u64,
    folded_sample: u64,
}

impl NonUniqueIndexSampler {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            values: AHashMap::new(),
            index_size: 0,
            folded_unique: 0,
            folded_sample: 0,
        }
    }

    fn fold(&mut self) {
        self.folded_unique += self.values.len() as u64;
        self.folded_sample += self.values.values().sum::<u64>();
        self.values.clear();
    }
}

impl IndexSampler for NonUniqueIndexSampler {
    fn include(&mut self, values: &[Value]) {
        self.index_size += 1;
        *self.values.entry(tuple_hash(values)).or_insert(0) += 1;
        if self.values.len() >= self.buffer_size {
            self.fold();
        }
    }

    fn exclude(&mut self, values: &[Value]) {
        self.index_size = self.index_size.saturating_sub(1);
        let hash = tuple_hash(values);
        if let Some(count) = self.values.get_mut(&hash) {
            *count -= 1;
            if *count == 0 {
                self.values.remove(&hash);
            }
        }
    }

    fn result(&self) -> IndexSample {
        IndexSample {
            index_size: self.index_size,
            unique_values: self.folded_unique + self.values.len() as u64,
            sample_size: self.folded_sample + self.values.values().sum::<u64>(),
        }
    }
}

/// Every value in a unique index is distinct, so counting is enough.
#[derive(Default)]
pub struct UniqueIndexSampler {
    count: u64,
}

impl IndexSampler for UniqueIndexSampler {
    fn include(&mut self, _values: &[Value]) {
        self.count += 1;
    }

    fn exclude(&mut self, _values: &[Value]) {
        self.count = self.count.saturating_sub(1);
    }

    fn result(&self) -> IndexSample {
        IndexSample {
            index_size: self.count,
            unique_values: self.count,
            sample_size: self.count,
        }
    }
}

/// Sampler matching the uniqueness of `descriptor`.
pub fn sampler_for(descriptor: &IndexDescriptor, config: &IndexSamplingConfig) -> Box<dyn IndexSampler> {
    if descriptor.is_unique() {
        Box::new(UniqueIndexSampler::default())
    } else {
        Box::new(NonUniqueIndexSampler::new(config.buffer_size))
    }
}
