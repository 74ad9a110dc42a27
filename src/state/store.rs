//! Durable identity → state table.
//!
//! Loaded once when a provider starts and rewritten synchronously on every
//! transition, so a state read after a restart matches the last transition
//! that returned `Ok`.

use super::{IndexStateRecord, InternalIndexState};
use crate::codec::{decode_framed, encode_framed, write_atomically};
use crate::error::Result;
use crate::types::IndexId;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const MAGIC: &[u8; 4] = b"SKIX";

pub struct IndexStateStore {
    path: PathBuf,
    records: RwLock<BTreeMap<IndexId, IndexStateRecord>>,
}

impl IndexStateStore {
    pub const FILE_NAME: &'static str = "index-states.bin";

    /// Open (or create) the state table under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::FILE_NAME);
        let records = if path.exists() {
            let bytes = fs::read(&path)?;
            let payload = decode_framed(MAGIC, &bytes, &path)?;
            bincode::deserialize(payload)?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), records = records.len(), "loaded index states");
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, id: IndexId) -> Option<IndexStateRecord> {
        self.records.read().get(&id).cloned()
    }

    pub fn state(&self, id: IndexId) -> Option<InternalIndexState> {
        self.records.read().get(&id).map(|r| r.state)
    }

    /// Failure description, only while the index is FAILED.
    pub fn failure(&self, id: IndexId) -> Option<String> {
        self.records
            .read()
            .get(&id)
            .filter(|r| r.state == InternalIndexState::Failed)
            .and_then(|r| r.failure.clone())
    }

    pub fn ids(&self) -> Vec<IndexId> {
        self.records.read().keys().copied().collect()
    }

    pub fn set_populating(&self, id: IndexId) -> Result<()> {
        self.mutate(id, |_| Some(IndexStateRecord::populating()))
    }

    /// Record ONLINE unless the index already FAILED. Returns the state that
    /// was left in place.
    pub fn set_online(&self, id: IndexId) -> Result<InternalIndexState> {
        let mut outcome = InternalIndexState::Online;
        self.mutate(id, |current| match current {
            Some(r) if r.state == InternalIndexState::Failed => {
                outcome = InternalIndexState::Failed;
                Some(r.clone())
            }
            _ => Some(IndexStateRecord::online()),
        })?;
        Ok(outcome)
    }

    pub fn set_failed(&self, id: IndexId, description: &str) -> Result<()> {
        self.mutate(id, |_| Some(IndexStateRecord::failed(description)))
    }

    pub fn remove(&self, id: IndexId) -> Result<()> {
        self.mutate(id, |_| None)
    }

    /// Apply `f` to the record for `id` and flush before the new value
    /// becomes visible. A failed flush leaves the in-memory table untouched.
    fn mutate<F>(&self, id: IndexId, f: F) -> Result<()>
    where
        F: FnOnce(Option<&IndexStateRecord>) -> Option<IndexStateRecord>,
    {
        let mut records = self.records.write();
        let current = records.get(&id);
        let next = f(current);
        if current == next.as_ref() {
            return Ok(());
        }
        let mut updated = records.clone();
        match &next {
            Some(record) => updated.insert(id, record.clone()),
            None => updated.remove(&id),
        };
        let payload = bincode::serialize(&updated)?;
        write_atomically(&self.path, &encode_framed(MAGIC, &payload))?;
        *records = updated;
        info!(
            index_id = id,
            state = next.as_ref().map(|r| r.state.to_string()).unwrap_or_else(|| "ABSENT".into()),
            "index state flushed"
        );
        Ok(())
    }
}
