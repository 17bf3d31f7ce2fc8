//! File-backed local store
//!
//! Keeps the map in memory and persists the whole map as a JSON object after
//! every write, replacing the file atomically (temp file + rename). Staged
//! writes update memory only and reach disk on the next persist.

use super::memory::MemoryLocalStore;
use super::LocalStore;
use crate::error::StoreError;
use crate::snapshot::StorageSnapshot;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Persistent local store
#[derive(Debug)]
pub struct FileLocalStore {
    path: PathBuf,
    memory: MemoryLocalStore,
}

impl FileLocalStore {
    /// Open (or create on first write) the store at `path`
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or is not a flat
    /// string map
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let memory = match std::fs::read(&path) {
            Ok(bytes) => {
                let map: BTreeMap<String, String> =
                    serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
                        path: path.clone(),
                        source,
                    })?;
                MemoryLocalStore::with_entries(map)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MemoryLocalStore::new(),
            Err(e) => return Err(StoreError::io_error(path, e)),
        };
        Ok(Self { path, memory })
    }

    /// Backing file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the current map
    ///
    /// # Errors
    /// Returns error if the temp file cannot be written or renamed
    pub fn flush_to_disk(&self) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let body = serde_json::to_vec_pretty(&self.memory.dump()).map_err(|source| {
            StoreError::Json {
                path: self.path.clone(),
                source,
            }
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| StoreError::io_error(&dir, e))?;
        tmp.write_all(&body)
            .map_err(|e| StoreError::io_error(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::io_error(&self.path, e.error))?;
        Ok(())
    }

    fn persist_or_log(&self) {
        if let Err(e) = self.flush_to_disk() {
            tracing::warn!(path = %self.path.display(), error = %e, "local store not persisted");
        }
    }
}

impl LocalStore for FileLocalStore {
    fn read(&self, keys: &[String]) -> StorageSnapshot {
        self.memory.read(keys)
    }

    fn write(&self, entries: &BTreeMap<String, Option<String>>) {
        self.memory.write(entries);
        self.persist_or_log();
    }

    fn write_and_read(
        &self,
        entries: &BTreeMap<String, Option<String>>,
        keys: &[String],
    ) -> StorageSnapshot {
        let snapshot = self.memory.write_and_read(entries, keys);
        self.persist_or_log();
        snapshot
    }

    fn stage_and_read(
        &self,
        entries: &BTreeMap<String, Option<String>>,
        keys: &[String],
    ) -> StorageSnapshot {
        self.memory.write_and_read(entries, keys)
    }

    fn persist(&self) {
        self.persist_or_log();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");

        let store = FileLocalStore::open(&path).unwrap();
        store.set_item("plan_u1", "{\"vision\":\"X\"}");
        store.set_item("gone", "1");
        store.remove_item("gone");
        drop(store);

        let reopened = FileLocalStore::open(&path).unwrap();
        assert_eq!(
            reopened.get_item("plan_u1").as_deref(),
            Some("{\"vision\":\"X\"}")
        );
        assert_eq!(reopened.get_item("gone"), None);
    }

    #[test]
    fn staged_write_reaches_disk_on_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");
        let store = FileLocalStore::open(&path).unwrap();
        let keys = vec!["plan_u1".to_string()];
        let entries = BTreeMap::from([("plan_u1".to_string(), Some("R".to_string()))]);

        let staged = store.stage_and_read(&entries, &keys);
        assert_eq!(staged.get("plan_u1"), Some(Some("R")));
        assert!(!path.exists());

        store.persist();
        let reopened = FileLocalStore::open(&path).unwrap();
        assert_eq!(reopened.read(&keys), staged);
    }

    #[test]
    fn rejects_non_string_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");
        std::fs::write(&path, b"{\"k\": 1}").unwrap();

        assert!(matches!(
            FileLocalStore::open(&path),
            Err(StoreError::Json { .. })
        ));
    }
}
