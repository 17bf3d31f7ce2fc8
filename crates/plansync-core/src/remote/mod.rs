//! Remote document store
//!
//! One document per `(identity, tool)`:
//!
//! ```json
//! { "storage": { "<key>": "<value>" | null }, "updatedAt": "<store timestamp>" }
//! ```
//!
//! Writes merge into the document; subscribers receive the full document on
//! subscribe and after every commit, including the subscriber's own writes.

mod memory;

pub use memory::MemoryRemoteStore;

use crate::config::RemoteConfig;
use crate::error::SyncError;
use crate::snapshot::StorageSnapshot;
use crate::types::DocumentPath;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Decoded remote tool document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    /// Key → value-or-null
    pub storage: BTreeMap<String, Option<String>>,
    /// Assigned by the store on every commit
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RemoteDocument {
    /// Decode a raw document
    ///
    /// # Errors
    /// Returns [`SyncError::Malformed`] if `storage` is missing or is not a
    /// map of strings/nulls
    pub fn from_value(path: &DocumentPath, value: &serde_json::Value) -> Result<Self, SyncError> {
        serde_json::from_value(value.clone())
            .map_err(|e| SyncError::malformed(path.tool_id.as_str(), e.to_string()))
    }

    /// Restrict the document to `keys`.
    ///
    /// A key the document does not mention reads as absent. Returns `None`
    /// when the document mentions none of `keys`, which counts as "no remote
    /// data" rather than "delete everything".
    #[must_use]
    pub fn project(&self, keys: &[String]) -> Option<StorageSnapshot> {
        if !keys.iter().any(|k| self.storage.contains_key(k)) {
            return None;
        }
        Some(
            keys.iter()
                .map(|k| (k.clone(), self.storage.get(k).cloned().flatten()))
                .collect(),
        )
    }
}

/// One delivery on a live subscription
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// Current full document
    Document(RemoteDocument),
    /// Document does not exist (yet)
    Missing,
    /// Delivery failed; the subscription stays open
    Error(SyncError),
}

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Cancels a subscription from outside the task that consumes it
#[derive(Clone, Default)]
pub struct UnsubscribeHandle(Arc<Mutex<Option<Unsubscribe>>>);

impl UnsubscribeHandle {
    fn new(f: Unsubscribe) -> Self {
        Self(Arc::new(Mutex::new(Some(f))))
    }

    /// Run the backend's unsubscribe; later calls do nothing
    pub fn unsubscribe(&self) {
        let f = self.0.lock().take();
        if let Some(f) = f {
            f();
        }
    }
}

impl Debug for UnsubscribeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnsubscribeHandle")
            .field("active", &self.0.lock().is_some())
            .finish()
    }
}

/// Live document subscription
///
/// `next` returns `None` once the backend closes the stream. Dropping the
/// subscription unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<RemoteEvent>,
    handle: UnsubscribeHandle,
}

impl Subscription {
    /// Wrap a backend event stream with its unsubscribe action
    pub fn new(events: mpsc::Receiver<RemoteEvent>, unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            events,
            handle: UnsubscribeHandle::new(Box::new(unsubscribe)),
        }
    }

    /// Next delivery, in backend commit order
    pub async fn next(&mut self) -> Option<RemoteEvent> {
        self.events.recv().await
    }

    /// Handle that can cancel this subscription from elsewhere
    #[must_use]
    pub fn handle(&self) -> UnsubscribeHandle {
        self.handle.clone()
    }

    /// Stop deliveries now
    pub fn unsubscribe(self) {
        self.handle.unsubscribe();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}

/// Remote document store seam
#[async_trait]
pub trait RemoteStore: Send + Sync + Debug {
    /// One-shot fetch; `Ok(None)` if the document does not exist
    async fn load(&self, path: &DocumentPath) -> Result<Option<RemoteDocument>, SyncError>;

    /// Merge `storage` into the document's `storage` map and refresh
    /// `updatedAt`; keys not in `storage` are left untouched
    async fn save(
        &self,
        path: &DocumentPath,
        storage: &BTreeMap<String, Option<String>>,
    ) -> Result<(), SyncError>;

    /// Live updates, starting with the current document
    async fn subscribe(&self, path: &DocumentPath) -> Result<Subscription, SyncError>;
}

/// Build the remote store described by `config`
///
/// # Errors
/// Returns [`SyncError::NotConfigured`] when no endpoint is set or its
/// scheme has no backend
pub fn connect_remote(config: &RemoteConfig) -> Result<Arc<dyn RemoteStore>, SyncError> {
    let endpoint = config
        .endpoint
        .as_deref()
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| SyncError::NotConfigured("no remote endpoint set".to_string()))?;

    match endpoint.split_once("://") {
        Some(("memory", _)) => {
            tracing::info!(endpoint, "using in-process remote store");
            Ok(Arc::new(MemoryRemoteStore::new()))
        }
        Some((scheme, _)) => Err(SyncError::NotConfigured(format!(
            "unsupported remote scheme '{scheme}'"
        ))),
        None => Err(SyncError::NotConfigured(format!(
            "endpoint '{endpoint}' has no scheme"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Identity, ToolId};
    use serde_json::json;

    fn path() -> DocumentPath {
        DocumentPath::new(Identity::new("u1"), ToolId::new("swot"))
    }

    #[test]
    fn decodes_nulls_and_timestamp() {
        let doc = RemoteDocument::from_value(
            &path(),
            &json!({"storage": {"a": "1", "b": null}, "updatedAt": "2026-01-01T00:00:00Z"}),
        )
        .unwrap();
        assert_eq!(doc.storage.get("a"), Some(&Some("1".to_string())));
        assert_eq!(doc.storage.get("b"), Some(&None));
        assert!(doc.updated_at.is_some());
    }

    #[test]
    fn rejects_unexpected_shape() {
        let err = RemoteDocument::from_value(&path(), &json!({"storage": {"a": 5}})).unwrap_err();
        assert!(matches!(err, SyncError::Malformed { .. }));

        let err = RemoteDocument::from_value(&path(), &json!({"storage": "oops"})).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Malformed);
    }

    #[test]
    fn projection_fills_unmentioned_keys_as_absent() {
        let doc = RemoteDocument {
            storage: BTreeMap::from([
                ("a".to_string(), Some("1".to_string())),
                ("foreign".to_string(), Some("x".to_string())),
            ]),
            updated_at: None,
        };
        let keys = vec!["a".to_string(), "b".to_string()];
        let projected = doc.project(&keys).unwrap();
        assert_eq!(projected.get("a"), Some(Some("1")));
        assert_eq!(projected.get("b"), Some(None));
        assert_eq!(projected.get("foreign"), None);

        assert!(doc.project(&["zzz".to_string()]).is_none());
    }

    #[test]
    fn connect_requires_endpoint() {
        let err = connect_remote(&RemoteConfig::default()).unwrap_err();
        assert!(err.requires_user_action());

        let cfg = RemoteConfig {
            endpoint: Some("https://example.invalid".into()),
            ..RemoteConfig::default()
        };
        assert!(matches!(connect_remote(&cfg), Err(SyncError::NotConfigured(_))));

        let cfg = RemoteConfig {
            endpoint: Some("memory://local".into()),
            ..RemoteConfig::default()
        };
        assert!(connect_remote(&cfg).is_ok());
    }
}
