use super::{release_all, EntityIds, MergedIds, PartitionSearcher};
use crate::config::IndexSamplingConfig;
use crate::error::Result;
use crate::query::IndexQuery;
use crate::sampling::{sampler_for, IndexSample};
use crate::traits::IndexReader;
use crate::types::{EntityId, IndexDescriptor};
use crate::value::{same_tuple, Value};
use tracing::{debug, warn};

/// Reader over every partition of one logical index.
///
/// Results from all partitions are merged by ascending id. Searchers are
/// released on `close`, or on drop if the reader was never closed.
pub struct PartitionedReader<S: PartitionSearcher> {
    descriptor: IndexDescriptor,
    sampling: IndexSamplingConfig,
    searchers: Vec<S>,
    closed: bool,
}

impl<S: PartitionSearcher> PartitionedReader<S> {
    pub fn new(descriptor: IndexDescriptor, sampling: IndexSamplingConfig, searchers: Vec<S>) -> Self {
        Self {
            descriptor,
            sampling,
            searchers,
            closed: false,
        }
    }

    pub fn partition_count(&self) -> usize {
        self.searchers.len()
    }

    fn release(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        release_all(
            self.searchers
                .iter_mut()
                .enumerate()
                .map(|(i, searcher)| (i, searcher.close())),
        )
    }
}

impl<S: PartitionSearcher> IndexReader for PartitionedReader<S> {
    fn query(&self, query: &IndexQuery) -> Result<EntityIds<'_>> {
        let slot = query.slot_in(self.descriptor.schema())?;
        let mut sources: Vec<EntityIds<'_>> = Vec::with_capacity(self.searchers.len());
        for searcher in &self.searchers {
            let candidates = searcher.search(slot, query)?;
            match query {
                IndexQuery::Exact { value, .. } => {
                    let wanted = value.clone();
                    sources.push(Box::new(
                        candidates.filter(move |id| holds_value(searcher, *id, slot, &wanted)),
                    ));
                }
                _ => sources.push(candidates),
            }
        }
        Ok(Box::new(MergedIds::new(sources)))
    }

    fn count_indexed(&self, entity: EntityId, values: &[Value]) -> Result<u64> {
        let mut count = 0;
        for searcher in &self.searchers {
            count += searcher
                .stored_values(entity)?
                .iter()
                .filter(|stored| same_tuple(stored, values))
                .count() as u64;
        }
        Ok(count)
    }

    fn sample_index(&self) -> Result<IndexSample> {
        let mut sampler = sampler_for(&self.descriptor, &self.sampling);
        for searcher in &self.searchers {
            searcher.sample_into(sampler.as_mut())?;
        }
        Ok(sampler.result())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.release()
    }
}

impl<S: PartitionSearcher> Drop for PartitionedReader<S> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(index = %self.descriptor, error = %e, "reader released with errors");
        }
    }
}

/// Exact-match compensation: the backend matched on the coarse key, keep
/// the candidate only if a stored value really equals `wanted`.
fn holds_value<S: PartitionSearcher>(searcher: &S, entity: EntityId, slot: usize, wanted: &Value) -> bool {
    match searcher.stored_values(entity) {
        Ok(tuples) => tuples
            .iter()
            .any(|tuple| tuple.get(slot).is_some_and(|v| v.same_value(wanted))),
        Err(e) => {
            debug!(entity, error = %e, "dropping candidate that could not be re-validated");
            false
        }
    }
}
