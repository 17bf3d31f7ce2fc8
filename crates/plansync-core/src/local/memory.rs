//! In-process local store

use super::LocalStore;
use crate::snapshot::StorageSnapshot;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// In-memory store, shared through `Arc` with the tool instance
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    inner: RwLock<HashMap<String, String>>,
}

impl MemoryLocalStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create store pre-populated with `entries`
    #[must_use]
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            inner: RwLock::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Number of keys held, including keys of other tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the store holds no keys
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Copy of every key/value
    #[must_use]
    pub fn dump(&self) -> BTreeMap<String, String> {
        self.inner
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

fn apply(map: &mut HashMap<String, String>, entries: &BTreeMap<String, Option<String>>) {
    for (key, value) in entries {
        match value {
            Some(v) => {
                map.insert(key.clone(), v.clone());
            }
            None => {
                map.remove(key);
            }
        }
    }
}

fn snapshot(map: &HashMap<String, String>, keys: &[String]) -> StorageSnapshot {
    keys.iter()
        .map(|k| (k.clone(), map.get(k).cloned()))
        .collect()
}

impl LocalStore for MemoryLocalStore {
    fn read(&self, keys: &[String]) -> StorageSnapshot {
        snapshot(&self.inner.read(), keys)
    }

    fn write(&self, entries: &BTreeMap<String, Option<String>>) {
        apply(&mut self.inner.write(), entries);
    }

    fn write_and_read(
        &self,
        entries: &BTreeMap<String, Option<String>>,
        keys: &[String],
    ) -> StorageSnapshot {
        let mut guard = self.inner.write();
        apply(&mut guard, entries);
        snapshot(&guard, keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_removes_and_missing_reads_absent() {
        let store = MemoryLocalStore::with_entries([("a", "1"), ("b", "2")]);
        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        let after = store.write_and_read(
            &BTreeMap::from([("a".to_string(), None), ("c".to_string(), Some(String::new()))]),
            &keys,
        );

        assert_eq!(after.get("a"), Some(None));
        assert_eq!(after.get("b"), Some(Some("2")));
        assert_eq!(after.get("c"), Some(Some("")));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn read_ignores_foreign_keys() {
        let store = MemoryLocalStore::with_entries([("mine", "1"), ("theirs", "2")]);
        let snap = store.read(&["mine".to_string()]);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.get("theirs"), None);
    }
}
