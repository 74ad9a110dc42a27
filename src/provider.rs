//! Provider selection
//!
//! `create_provider` picks the backend named in the configuration. The
//! tantivy backend needs the `fulltext-tantivy` feature.

use crate::config::{BackendKind, IndexConfig};
use crate::error::Result;
use crate::partitioned::PartitionedIndexProvider;
use crate::traits::SchemaIndexProvider;
use crate::tree::TreeBackend;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name and version of a provider implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub key: String,
    pub version: String,
}

impl ProviderDescriptor {
    pub fn new(key: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.key, self.version)
    }
}

/// Build the provider selected by `config.backend`.
pub fn create_provider(config: &IndexConfig) -> Result<Box<dyn SchemaIndexProvider>> {
    match config.backend {
        BackendKind::Tree => Ok(Box::new(PartitionedIndexProvider::new(TreeBackend, config)?)),
        BackendKind::Tantivy => {
            #[cfg(feature = "fulltext-tantivy")]
            {
                let backend = crate::fulltext::TantivyBackend::new(config.writer_heap_bytes);
                Ok(Box::new(PartitionedIndexProvider::new(backend, config)?))
            }
            #[cfg(not(feature = "fulltext-tantivy"))]
            {
                Err(crate::error::IndexError::Resource(
                    "tantivy backend requested but the 'fulltext-tantivy' feature is not enabled".into(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use tempfile::tempdir;

    #[test]
    fn test_create_tree_provider() {
        let dir = tempdir().unwrap();
        let provider = create_provider(&IndexConfig::new(dir.path())).unwrap();
        assert_eq!(provider.descriptor().key, "tree");
        assert_eq!(provider.descriptor().to_string(), "tree-1.0");
        assert!(dir.path().join("tree").is_dir());
    }

    #[cfg(not(feature = "fulltext-tantivy"))]
    #[test]
    fn test_tantivy_needs_feature() {
        let dir = tempdir().unwrap();
        let config = IndexConfig::new(dir.path()).backend(BackendKind::Tantivy);
        assert!(matches!(create_provider(&config), Err(IndexError::Resource(_))));
    }
}
