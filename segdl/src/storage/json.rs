//! JSON state file store.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::memory::MemoryStore;
use super::{StorageResult, TransferStore};
use crate::model::{Segment, Transfer, TransferId};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    transfers: Vec<Transfer>,
    #[serde(default)]
    segments: Vec<(TransferId, Vec<Segment>)>,
}

/// Transfer store persisted as a single JSON document.
///
/// State is held in memory and written to `<path>.tmp` then renamed over
/// `path` after each mutation, so a crash leaves either the old or the new
/// snapshot on disk.
pub struct JsonFileStore {
    path: PathBuf,
    state: MemoryStore,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Opens the store at `path`, loading existing state if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();

        let state = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let snapshot: Snapshot = if content.trim().is_empty() {
                Snapshot::default()
            } else {
                serde_json::from_str(&content)?
            };
            info!(
                path = %path.display(),
                transfers = snapshot.transfers.len(),
                "loaded transfer state"
            );
            MemoryStore::from_parts(snapshot.transfers, snapshot.segments)
        } else {
            MemoryStore::new()
        };

        Ok(Self {
            path,
            state,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock();

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            transfers: self.state.list()?,
            segments: self.state.all_segments(),
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)?;
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), "state snapshot written");
        Ok(())
    }
}

impl TransferStore for JsonFileStore {
    fn insert(&self, transfer: &Transfer) -> StorageResult<()> {
        self.state.insert(transfer)?;
        self.persist()
    }

    fn update(&self, transfer: &Transfer) -> StorageResult<()> {
        self.state.update(transfer)?;
        self.persist()
    }

    fn get(&self, id: &TransferId) -> StorageResult<Option<Transfer>> {
        self.state.get(id)
    }

    fn delete(&self, id: &TransferId) -> StorageResult<()> {
        self.state.delete(id)?;
        self.persist()
    }

    fn list(&self) -> StorageResult<Vec<Transfer>> {
        self.state.list()
    }

    fn save_segments(&self, id: &TransferId, segments: &[Segment]) -> StorageResult<()> {
        self.state.save_segments(id, segments)?;
        self.persist()
    }

    fn update_segment(&self, segment: &Segment) -> StorageResult<()> {
        self.state.update_segment(segment)?;
        self.persist()
    }

    fn segments_for(&self, id: &TransferId) -> StorageResult<Vec<Segment>> {
        self.state.segments_for(id)
    }

    fn delete_segments(&self, id: &TransferId) -> StorageResult<()> {
        self.state.delete_segments(id)?;
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ByteRange, TransferStatus};
    use crate::storage::tests::{exercise_store, transfer};
    use tempfile::TempDir;

    #[test]
    fn test_json_store_contract() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("state.json")).unwrap();
        exercise_store(&store);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            let t = transfer("keep", 3, TransferStatus::Paused);
            store.insert(&t).unwrap();
            store
                .save_segments(
                    &t.id,
                    &[Segment::new(
                        t.id.clone(),
                        0,
                        ByteRange::new(0, 99),
                        dir.path().join("keep.part0"),
                    )],
                )
                .unwrap();
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        let t = reopened.get(&TransferId::new("keep")).unwrap().unwrap();
        assert_eq!(t.status, TransferStatus::Paused);
        assert_eq!(reopened.segments_for(&t.id).unwrap().len(), 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(JsonFileStore::open(&path).is_err());
    }
}
