//! Storage snapshots and their canonical serialization
//!
//! A [`StorageSnapshot`] maps concrete keys to a value or absence. Its
//! canonical form sorts keys and length-prefixes every field, so two maps
//! with the same entries always serialize to the same bytes regardless of
//! insertion order, and an absent key never collides with an empty string.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter, Write as _};

/// Key → value-or-absent mapping for one session's keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageSnapshot {
    entries: BTreeMap<String, Option<String>>,
}

impl StorageSnapshot {
    /// Empty snapshot
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot in which every key is absent
    #[must_use]
    pub fn absent<'a>(keys: impl IntoIterator<Item = &'a String>) -> Self {
        keys.into_iter().map(|k| (k.clone(), None)).collect()
    }

    /// Set an entry (`None` = absent)
    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) {
        self.entries.insert(key.into(), value);
    }

    /// Lookup: `None` if the key is not part of the snapshot,
    /// `Some(None)` if it is part of it but absent from the store
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.entries.get(key).map(Option::as_deref)
    }

    /// Number of keys covered
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no keys are covered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any covered key holds a value
    #[must_use]
    pub fn has_values(&self) -> bool {
        self.entries.values().any(Option::is_some)
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Borrow as the wire/storage map
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, Option<String>> {
        &self.entries
    }

    /// Consume into the wire/storage map
    #[inline]
    #[must_use]
    pub fn into_map(self) -> BTreeMap<String, Option<String>> {
        self.entries
    }

    /// Canonical, order-independent serialization
    #[must_use]
    pub fn serialize(&self) -> String {
        serialize(self)
    }

    /// Blake3 digest of the canonical serialization
    #[must_use]
    pub fn digest(&self) -> SnapshotDigest {
        SnapshotDigest::of(self)
    }
}

impl From<BTreeMap<String, Option<String>>> for StorageSnapshot {
    fn from(entries: BTreeMap<String, Option<String>>) -> Self {
        Self { entries }
    }
}

impl FromIterator<(String, Option<String>)> for StorageSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Option<String>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Canonical encoding: `<len>:<key>=<len>:<value>;` per key in byte order,
/// with `!` in place of the value for an absent key.
#[must_use]
pub fn serialize(snapshot: &StorageSnapshot) -> String {
    let mut out = String::new();
    for (key, value) in &snapshot.entries {
        // writing to a String cannot fail
        let _ = write!(out, "{}:{key}=", key.len());
        match value {
            Some(v) => {
                let _ = write!(out, "{}:{v}", v.len());
            }
            None => out.push('!'),
        }
        out.push(';');
    }
    out
}

/// Change-detection marker: blake3 of the canonical serialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotDigest([u8; 32]);

impl SnapshotDigest {
    /// Digest a snapshot
    #[inline]
    #[must_use]
    pub fn of(snapshot: &StorageSnapshot) -> Self {
        Self(*blake3::hash(serialize(snapshot).as_bytes()).as_bytes())
    }

    /// First 8 bytes as hex, for logs
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for SnapshotDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
