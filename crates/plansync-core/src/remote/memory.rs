//! In-process remote document store
//!
//! Documents are kept as raw JSON so any shape can be represented. Commits
//! are broadcast while the document entry is still locked, which makes
//! delivery order equal commit order.

use super::{RemoteDocument, RemoteEvent, RemoteStore, Subscription};
use crate::error::SyncError;
use crate::types::DocumentPath;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;

const BROADCAST_CAPACITY: usize = 64;
const SUBSCRIBER_BUFFER: usize = 32;

#[derive(Debug)]
struct Slot {
    document: Option<Value>,
    commits: broadcast::Sender<Option<Value>>,
}

impl Slot {
    fn new() -> Self {
        let (commits, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            document: None,
            commits,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    slots: DashMap<DocumentPath, Slot>,
    forwarders: DashMap<u64, (DocumentPath, AbortHandle)>,
    next_subscriber: AtomicU64,
}

/// In-process document store with live subscriptions
#[derive(Debug, Clone, Default)]
pub struct MemoryRemoteStore {
    inner: Arc<Inner>,
}

impl MemoryRemoteStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw document, if any
    #[must_use]
    pub fn raw_document(&self, path: &DocumentPath) -> Option<Value> {
        self.inner.slots.get(path).and_then(|s| s.document.clone())
    }

    /// Replace a document verbatim and notify subscribers
    pub fn put_raw(&self, path: &DocumentPath, value: Value) {
        let mut slot = self.inner.slots.entry(path.clone()).or_insert_with(Slot::new);
        slot.document = Some(value);
        let _ = slot.commits.send(slot.document.clone());
    }

    /// Delete a document and notify subscribers
    pub fn delete(&self, path: &DocumentPath) {
        if let Some(mut slot) = self.inner.slots.get_mut(path) {
            slot.document = None;
            let _ = slot.commits.send(None);
        }
    }

    /// Live subscriptions on `path`
    #[must_use]
    pub fn subscriber_count(&self, path: &DocumentPath) -> usize {
        self.inner
            .forwarders
            .iter()
            .filter(|e| &e.value().0 == path)
            .count()
    }

    /// Forcibly close every subscription on `path`, as a backend would
    /// after a connection reset
    pub fn close_subscriptions(&self, path: &DocumentPath) {
        let ids: Vec<u64> = self
            .inner
            .forwarders
            .iter()
            .filter(|e| &e.value().0 == path)
            .map(|e| *e.key())
            .collect();
        for id in ids {
            if let Some((_, (_, abort))) = self.inner.forwarders.remove(&id) {
                abort.abort();
            }
        }
    }

    fn merge_storage(
        document: &mut Option<Value>,
        storage: &BTreeMap<String, Option<String>>,
    ) {
        let root = document.get_or_insert_with(|| Value::Object(Map::new()));
        if !root.is_object() {
            *root = Value::Object(Map::new());
        }
        let Value::Object(fields) = root else {
            return;
        };

        let nested = fields
            .entry("storage")
            .or_insert_with(|| Value::Object(Map::new()));
        if !nested.is_object() {
            *nested = Value::Object(Map::new());
        }
        if let Value::Object(map) = nested {
            for (key, value) in storage {
                let v = value.clone().map_or(Value::Null, Value::String);
                map.insert(key.clone(), v);
            }
        }
        fields.insert(
            "updatedAt".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
    }
}

fn decode(path: &DocumentPath, value: Option<&Value>) -> RemoteEvent {
    match value {
        None => RemoteEvent::Missing,
        Some(v) => match RemoteDocument::from_value(path, v) {
            Ok(doc) => RemoteEvent::Document(doc),
            Err(e) => RemoteEvent::Error(e),
        },
    }
}

async fn forward(
    inner: Arc<Inner>,
    path: DocumentPath,
    mut commits: broadcast::Receiver<Option<Value>>,
    tx: mpsc::Sender<RemoteEvent>,
) {
    loop {
        let event = match commits.recv().await {
            Ok(value) => decode(&path, value.as_ref()),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(tool_id = %path.tool_id, skipped, "subscriber lagged, resending latest");
                let latest = inner.slots.get(&path).and_then(|s| s.document.clone());
                decode(&path, latest.as_ref())
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if tx.send(event).await.is_err() {
            break;
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn load(&self, path: &DocumentPath) -> Result<Option<RemoteDocument>, SyncError> {
        self.raw_document(path)
            .map(|v| RemoteDocument::from_value(path, &v))
            .transpose()
    }

    async fn save(
        &self,
        path: &DocumentPath,
        storage: &BTreeMap<String, Option<String>>,
    ) -> Result<(), SyncError> {
        let mut slot = self.inner.slots.entry(path.clone()).or_insert_with(Slot::new);
        Self::merge_storage(&mut slot.document, storage);
        let _ = slot.commits.send(slot.document.clone());
        tracing::trace!(tool_id = %path.tool_id, keys = storage.len(), "remote commit");
        Ok(())
    }

    async fn subscribe(&self, path: &DocumentPath) -> Result<Subscription, SyncError> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        // Register for commits before reading the current document so no
        // commit falls between the two.
        let (commits, current) = {
            let slot = self.inner.slots.entry(path.clone()).or_insert_with(Slot::new);
            (slot.commits.subscribe(), slot.document.clone())
        };
        // Buffer is empty, so the first send cannot fail for capacity.
        let _ = tx.try_send(decode(path, current.as_ref()));

        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(forward(Arc::clone(&self.inner), path.clone(), commits, tx));
        self.inner
            .forwarders
            .insert(id, (path.clone(), task.abort_handle()));

        let inner = Arc::clone(&self.inner);
        Ok(Subscription::new(rx, move || {
            if let Some((_, (_, abort))) = inner.forwarders.remove(&id) {
                abort.abort();
            }
        }))
    }
}
