//! Provider configuration
//!
//! Runtime-selectable backend, in the same spirit as the WAL and
//! transaction modes of the database.
//!
//! # Example
//! ```ignore
//! use sekejap_index::config::{IndexConfig, BackendKind};
//!
//! let config = IndexConfig::new("./data/schema")
//!     .backend(BackendKind::from_str("tree"))
//!     .max_entries_per_partition(500_000);
//! let provider = sekejap_index::create_provider(&config)?;
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Index backend - selectable at runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// Sorted posting lists with copy-on-write snapshots (DEFAULT)
    #[default]
    Tree,

    /// Tantivy index per partition (needs the `fulltext-tantivy` feature)
    Tantivy,
}

impl BackendKind {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "tree" | "native" | "btree" => BackendKind::Tree,
            "tantivy" | "lucene" | "fulltext" | "search" => BackendKind::Tantivy,
            _ => BackendKind::default(),
        }
    }
}

/// Sampling configuration handed to populators and accessors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSamplingConfig {
    /// Whether samplers are created at all
    pub enabled: bool,
    /// Distinct values tracked before a partial sample is folded
    pub buffer_size: usize,
}

impl Default for IndexSamplingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_size: 100_000,
        }
    }
}

impl IndexSamplingConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }
}

/// Schema index provider configuration
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Backend used by `create_provider`
    pub backend: BackendKind,
    /// Root directory; each provider keeps its files under `root/<provider key>`
    pub root: PathBuf,
    /// Entries a partition takes before writes roll over to a new one
    pub max_entries_per_partition: u64,
    /// Tantivy writer memory budget in bytes
    pub writer_heap_bytes: usize,
    /// Node id range covered by one label scan partition
    pub nodes_per_label_partition: u64,
    /// Default sampling configuration
    pub sampling: IndexSamplingConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            root: PathBuf::from("schema-index"),
            max_entries_per_partition: 1_000_000,
            writer_heap_bytes: 50_000_000,
            nodes_per_label_partition: 1 << 20,
            sampling: IndexSamplingConfig::default(),
        }
    }
}

impl IndexConfig {
    /// Create config rooted at `root`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Set backend
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set root directory
    pub fn root(mut self, root: impl AsRef<Path>) -> Self {
        self.root = root.as_ref().to_path_buf();
        self
    }

    /// Set partition capacity (at least 1)
    pub fn max_entries_per_partition(mut self, max: u64) -> Self {
        self.max_entries_per_partition = max.max(1);
        self
    }

    /// Set tantivy writer heap
    pub fn writer_heap_bytes(mut self, bytes: usize) -> Self {
        self.writer_heap_bytes = bytes;
        self
    }

    /// Set node id range per label scan partition (at least 1)
    pub fn nodes_per_label_partition(mut self, nodes: u64) -> Self {
        self.nodes_per_label_partition = nodes.max(1);
        self
    }

    /// Set default sampling
    pub fn sampling(mut self, sampling: IndexSamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_str() {
        assert_eq!(BackendKind::from_str("TREE"), BackendKind::Tree);
        assert_eq!(BackendKind::from_str("lucene"), BackendKind::Tantivy);
        assert_eq!(BackendKind::from_str("Search"), BackendKind::Tantivy);
        assert_eq!(BackendKind::from_str("unknown"), BackendKind::Tree);
    }

    #[test]
    fn test_builder() {
        let config = IndexConfig::new("/tmp/idx")
            .backend(BackendKind::Tantivy)
            .max_entries_per_partition(0)
            .sampling(IndexSamplingConfig::disabled().buffer_size(0));
        assert_eq!(config.root, PathBuf::from("/tmp/idx"));
        assert_eq!(config.max_entries_per_partition, 1);
        assert!(!config.sampling.enabled);
        assert_eq!(config.sampling.buffer_size, 1);
    }
}
