//! Schema index contract
//!
//! Every backend implements the same lifecycle:
//!
//! ```text
//! SchemaIndexProvider
//!   ├── get_populator      → IndexPopulator  (POPULATING → ONLINE | FAILED)
//!   │                          └── new_populating_updater → IndexUpdater
//!   └── get_online_accessor → IndexAccessor  (ONLINE)
//!                              ├── new_updater → IndexUpdater
//!                              └── new_reader  → IndexReader
//! ```
//!
//! Readers and updaters borrow their owner and cannot outlive it. Both
//! release their resources on `close`, or on drop when never closed.

use crate::config::IndexSamplingConfig;
use crate::error::Result;
use crate::partition::EntityIds;
use crate::provider::ProviderDescriptor;
use crate::query::IndexQuery;
use crate::sampling::IndexSample;
use crate::state::InternalIndexState;
use crate::types::{EntityId, IndexDescriptor, IndexId};
use crate::update::{IndexEntryUpdate, PropertyAccessor};
use crate::value::Value;
use std::sync::Arc;

/// Read side of one logical index.
pub trait IndexReader: Send {
    /// Matching entity ids, ascending, each id once.
    fn query(&self, query: &IndexQuery) -> Result<EntityIds<'_>>;

    /// How many entries hold exactly `values` for `entity`.
    fn count_indexed(&self, entity: EntityId, values: &[Value]) -> Result<u64>;

    /// Cardinality statistics computed from the current contents.
    fn sample_index(&self) -> Result<IndexSample>;

    /// Release every partition, reporting all failures at once.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Write side of one logical index.
pub trait IndexUpdater: Send {
    /// Stage one update. Fails only on updates addressed to another schema.
    fn process(&mut self, update: IndexEntryUpdate) -> Result<()>;

    /// Apply everything staged and release the updater. Conflicting data
    /// (missing entries, duplicates) is absorbed, never reported.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Builds one index from scratch.
pub trait IndexPopulator: Send + Sync {
    /// Allocate build resources and record POPULATING.
    fn create(&mut self) -> Result<()>;

    /// Delete build output and forget the persisted state. Never fails on
    /// a populator that was never created or is already closed.
    fn drop_index(&mut self) -> Result<()>;

    /// Bulk ingest ADD updates. A malformed update marks the index FAILED
    /// instead of returning an error.
    fn add(&self, updates: &[IndexEntryUpdate]) -> Result<()>;

    /// Updater for changes committed while population is running.
    fn new_populating_updater(
        &self,
        property_accessor: Arc<dyn PropertyAccessor>,
    ) -> Result<Box<dyn IndexUpdater + '_>>;

    fn configure_sampling(&self, enabled: bool);

    /// Feed one update to the sampler by hand.
    fn include_sample(&self, update: &IndexEntryUpdate);

    fn sample_result(&self) -> IndexSample;

    /// Durably record FAILED with `description`.
    fn mark_as_failed(&self, description: &str) -> Result<()>;

    /// `true`: flush and record ONLINE unless failed. `false`: discard
    /// the output.
    fn close(&mut self, populated_successfully: bool) -> Result<()>;

    /// Data conflicts absorbed so far.
    fn conflicts(&self) -> u64;
}

/// Serves one ONLINE index.
pub trait IndexAccessor: Send + Sync {
    fn new_updater(&self) -> Result<Box<dyn IndexUpdater + '_>>;

    fn new_reader(&self) -> Result<Box<dyn IndexReader + '_>>;

    /// Flush every partition to durable storage.
    fn force(&self) -> Result<()>;

    /// Delete the index files and the persisted state.
    fn drop_index(&mut self) -> Result<()>;

    /// Flush and release. Idempotent.
    fn close(&mut self) -> Result<()>;

    fn conflicts(&self) -> u64;
}

/// Maps index identities to populators and accessors, and keeps their
/// lifecycle state across restarts.
pub trait SchemaIndexProvider: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    fn get_populator(
        &self,
        id: IndexId,
        descriptor: &IndexDescriptor,
        sampling: &IndexSamplingConfig,
    ) -> Result<Box<dyn IndexPopulator>>;

    fn get_online_accessor(
        &self,
        id: IndexId,
        descriptor: &IndexDescriptor,
        sampling: &IndexSamplingConfig,
    ) -> Result<Box<dyn IndexAccessor>>;

    /// Persisted state; an identity never created needs building and
    /// reports POPULATING.
    fn get_initial_state(&self, id: IndexId, descriptor: &IndexDescriptor) -> InternalIndexState;

    /// Failure description of a FAILED index.
    fn get_population_failure(&self, id: IndexId) -> Result<String>;
}
