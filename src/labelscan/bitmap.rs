//! LabelBitmapPartition: per-label RoaringTreemaps persisted to disk.
//!
//! # Disk layout
//! ```text
//! {labelscan}/{ordinal}/{label:08x}.rbm   ← serialised RoaringTreemap
//! ```
//!
//! All bitmaps of a partition are loaded on open; an emptied label's file is
//! removed on flush.

use crate::codec::write_atomically;
use crate::error::{IndexError, Result};
use crate::types::{EntityId, LabelId};
use dashmap::DashMap;
use parking_lot::RwLock;
use roaring::RoaringTreemap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const EXTENSION: &str = "rbm";

pub struct LabelBitmapPartition {
    ordinal: usize,
    dir: PathBuf,
    /// label → node bitmap
    bitmaps: DashMap<LabelId, Arc<RwLock<RoaringTreemap>>>,
    /// labels with unsaved changes
    dirty: DashMap<LabelId, bool>,
}

impl LabelBitmapPartition {
    /// Create or open the partition in `dir`, loading every label file.
    pub fn open(dir: &Path, ordinal: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let bitmaps = DashMap::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let label = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| LabelId::from_str_radix(s, 16).ok())
                .ok_or_else(|| IndexError::Corrupt {
                    path: path.clone(),
                    reason: "not a label bitmap file name".into(),
                })?;
            bitmaps.insert(label, Arc::new(RwLock::new(load(&path)?)));
        }
        debug!(partition = ordinal, labels = bitmaps.len(), "opened label scan partition");
        Ok(Self {
            ordinal,
            dir: dir.to_path_buf(),
            bitmaps,
            dirty: DashMap::new(),
        })
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    fn rbm_path(&self, label: LabelId) -> PathBuf {
        self.dir.join(format!("{label:08x}.{EXTENSION}"))
    }

    pub fn insert(&self, label: LabelId, node: EntityId) {
        let bm = self
            .bitmaps
            .entry(label)
            .or_insert_with(|| Arc::new(RwLock::new(RoaringTreemap::new())));
        if bm.write().insert(node) {
            self.dirty.insert(label, true);
        }
    }

    pub fn remove(&self, label: LabelId, node: EntityId) {
        if let Some(bm) = self.bitmaps.get(&label) {
            if bm.write().remove(node) {
                self.dirty.insert(label, true);
            }
        }
    }

    /// Copy of the nodes carrying `label`.
    pub fn snapshot(&self, label: LabelId) -> RoaringTreemap {
        self.bitmaps
            .get(&label)
            .map(|bm| bm.read().clone())
            .unwrap_or_default()
    }

    /// Labels of `node` held in this partition, ascending.
    pub fn labels_of(&self, node: EntityId) -> Vec<LabelId> {
        let mut labels: Vec<LabelId> = self
            .bitmaps
            .iter()
            .filter(|entry| entry.value().read().contains(node))
            .map(|entry| *entry.key())
            .collect();
        labels.sort_unstable();
        labels
    }

    /// Write all dirty bitmaps to disk.
    pub fn flush(&self) -> Result<()> {
        let labels: Vec<LabelId> = self.dirty.iter().map(|entry| *entry.key()).collect();
        for label in labels {
            // Cleared before the snapshot: a write landing after it marks
            // the label again.
            self.dirty.remove(&label);
            if let Err(e) = self.write_label(label) {
                self.dirty.insert(label, true);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    fn write_label(&self, label: LabelId) -> Result<()> {
        let path = self.rbm_path(label);
        let bitmap = self.snapshot(label);
        if bitmap.is_empty() {
            match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        } else {
            let mut bytes = Vec::with_capacity(bitmap.serialized_size());
            bitmap.serialize_into(&mut bytes)?;
            write_atomically(&path, &bytes)
        }
    }
}

fn load(path: &Path) -> Result<RoaringTreemap> {
    let file = fs::File::open(path)?;
    RoaringTreemap::deserialize_from(file).map_err(|e| IndexError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
