//! Index lifecycle state.
//!
//! ```text
//! POPULATING ──close(true)──▶ ONLINE
//!      │
//!      └──mark_as_failed────▶ FAILED   (terminal until dropped)
//! ```

mod store;

pub use store::IndexStateStore;

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InternalIndexState {
    /// Being built, or not built yet
    Populating,
    /// Built and serving
    Online,
    /// Population failed; a failure description is recorded
    Failed,
}

impl fmt::Display for InternalIndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InternalIndexState::Populating => "POPULATING",
            InternalIndexState::Online => "ONLINE",
            InternalIndexState::Failed => "FAILED",
        })
    }
}

/// Durable record for one index identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStateRecord {
    pub state: InternalIndexState,
    pub failure: Option<String>,
}

impl IndexStateRecord {
    pub fn populating() -> Self {
        Self { state: InternalIndexState::Populating, failure: None }
    }

    pub fn online() -> Self {
        Self { state: InternalIndexState::Online, failure: None }
    }

    pub fn failed(description: impl Into<String>) -> Self {
        Self { state: InternalIndexState::Failed, failure: Some(description.into()) }
    }
}
