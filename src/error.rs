use crate::state::InternalIndexState;
use crate::types::{IndexId, PropertyKeyId};
use std::path::PathBuf;
use thiserror::Error;

/// One partition that could not be released during a best-effort close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFailure {
    pub partition: usize,
    pub reason: String,
}

/// Main error type for schema index operations
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Populator for index {0} has already been created")]
    AlreadyCreated(IndexId),

    #[error("Index {0} is already being populated")]
    PopulationInProgress(IndexId),

    #[error("Populator for index {0} is not building")]
    NotBuilding(IndexId),

    #[error("Index {id} is {actual}, expected {expected}")]
    InvalidState {
        id: IndexId,
        actual: InternalIndexState,
        expected: InternalIndexState,
    },

    #[error("Index {0} has no population failure recorded")]
    NoFailureRecorded(IndexId),

    #[error("Index {0} is closed")]
    Closed(IndexId),

    #[error("Property key {0} is not part of the index schema")]
    UnknownPropertyKey(PropertyKeyId),

    #[error("Update for {actual} does not match index schema {expected}")]
    SchemaMismatch { expected: String, actual: String },

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),

    #[error("Partition {partition}: {reason}")]
    Partition { partition: usize, reason: String },

    #[error(
        "Failed to release {} of {total} partitions: {}",
        .failures.len(),
        summarize(.failures)
    )]
    PartitionRelease {
        total: usize,
        failures: Vec<ReleaseFailure>,
    },

    #[error("Corrupt file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "fulltext-tantivy")]
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),
}

/// Result type alias for schema index operations
pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// Resource errors are surfaced to the caller and never retried internally.
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            IndexError::AlreadyCreated(_)
                | IndexError::PopulationInProgress(_)
                | IndexError::Partition { .. }
                | IndexError::PartitionRelease { .. }
                | IndexError::Corrupt { .. }
                | IndexError::Resource(_)
                | IndexError::Io(_)
        )
    }
}

fn summarize(failures: &[ReleaseFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("#{} ({})", f.partition, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}
