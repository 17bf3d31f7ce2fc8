//! Key resolution
//!
//! Turns a tool's storage key declarations plus the signed-in identity into
//! the concrete local-store keys. The tool instance runs the same rule on its
//! side after receiving `SET_IDENTITY`.

use crate::types::{Identity, StorageKeySpec};
use std::ops::Deref;

/// Concrete keys in declaration order
///
/// Not deduplicated; snapshots collapse repeated keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedKeys(Vec<String>);

impl ResolvedKeys {
    /// Wrap already-resolved keys
    #[inline]
    #[must_use]
    pub fn new(keys: Vec<String>) -> Self {
        Self(keys)
    }

    /// Whether `key` belongs to this set
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|k| k == key)
    }

    /// Consume into the raw list
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

impl Deref for ResolvedKeys {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Resolve key declarations for an identity.
///
/// Returns `None` when any `PerIdentity` declaration meets a guest (absent
/// identity); callers must not start a session in that case.
#[must_use]
pub fn resolve_keys(specs: &[StorageKeySpec], identity: Option<&Identity>) -> Option<ResolvedKeys> {
    let mut keys = Vec::with_capacity(specs.len());
    for spec in specs {
        match spec {
            StorageKeySpec::Global { key } => keys.push(key.clone()),
            StorageKeySpec::PerIdentity { prefix } => {
                let identity = identity?;
                keys.push(format!("{prefix}{}", identity.as_str()));
            }
        }
    }
    Some(ResolvedKeys(keys))
}
