// Sekejap Index - pluggable schema indexes for the Sekejap graph store
// Populate, update and query property indexes over partitioned backends

mod codec;
pub mod config;
pub mod error;
pub mod labelscan;
pub mod partition;
pub mod partitioned;
pub mod provider;
pub mod query;
pub mod sampling;
pub mod state;
pub mod traits;
pub mod tree;
pub mod types;
pub mod update;
pub mod value;

// Search-engine backed partitions (requires feature flag for implementation)
#[cfg(any(feature = "fulltext", feature = "fulltext-tantivy"))]
pub mod fulltext;

// Re-export main types
pub use config::{BackendKind, IndexConfig, IndexSamplingConfig};
pub use error::{IndexError, Result};
pub use labelscan::{LabelIds, LabelScanReader, LabelScanStore, NodeLabelUpdate};
pub use provider::{create_provider, ProviderDescriptor};
pub use query::IndexQuery;
pub use sampling::IndexSample;
pub use state::{IndexStateStore, InternalIndexState};
pub use traits::{IndexAccessor, IndexPopulator, IndexReader, IndexUpdater, SchemaIndexProvider};
pub use tree::TreeIndexProvider;
pub use types::{EntityId, IndexDescriptor, IndexId, SchemaDescriptor};
pub use update::{IndexEntryUpdate, PropertyAccessor};
pub use value::{Value, ValueTuple};

#[cfg(feature = "fulltext-tantivy")]
pub use fulltext::TantivyIndexProvider;
