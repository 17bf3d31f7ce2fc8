//! Local key-value store
//!
//! The store is shared with the sandboxed tool instance, which writes to it
//! directly. The engine only reads and writes its own resolved keys.

mod file;
mod memory;

pub use file::FileLocalStore;
pub use memory::MemoryLocalStore;

use crate::snapshot::StorageSnapshot;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Flat string-keyed store
///
/// `read` must observe one consistent state for all requested keys, and
/// `write_and_read` must not let another writer in between its writes and
/// its read.
pub trait LocalStore: Send + Sync + Debug {
    /// Snapshot the given keys; a missing key maps to absent
    fn read(&self, keys: &[String]) -> StorageSnapshot;

    /// Apply entries: `None` removes the key, `Some` sets it
    fn write(&self, entries: &BTreeMap<String, Option<String>>);

    /// Apply entries, then snapshot `keys`, as one atomic step
    fn write_and_read(
        &self,
        entries: &BTreeMap<String, Option<String>>,
        keys: &[String],
    ) -> StorageSnapshot;

    /// Like [`write_and_read`](Self::write_and_read), but durable
    /// persistence may wait for [`persist`](Self::persist)
    fn stage_and_read(
        &self,
        entries: &BTreeMap<String, Option<String>>,
        keys: &[String],
    ) -> StorageSnapshot {
        self.write_and_read(entries, keys)
    }

    /// Make staged writes durable; no-op for stores without a backing file
    fn persist(&self) {}

    /// Single-key lookup
    fn get_item(&self, key: &str) -> Option<String> {
        self.read(&[key.to_owned()])
            .get(key)
            .flatten()
            .map(str::to_owned)
    }

    /// Single-key set
    fn set_item(&self, key: &str, value: &str) {
        self.write(&BTreeMap::from([(key.to_owned(), Some(value.to_owned()))]));
    }

    /// Single-key removal
    fn remove_item(&self, key: &str) {
        self.write(&BTreeMap::from([(key.to_owned(), None)]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn trait_object_helpers() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryLocalStore::new());
        store.set_item("k", "v");
        assert_eq!(store.get_item("k").as_deref(), Some("v"));
        store.remove_item("k");
        assert_eq!(store.get_item("k"), None);
    }
}
