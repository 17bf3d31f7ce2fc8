//! Testing utilities for the plansync workspace
//!
//! Shared fixtures for sync scenarios: a fault-injecting remote that
//! records every save, a recording child channel, and a simulated device.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use plansync_core::{
    ChildChannel, DocumentPath, Identity, LocalStore, MemoryLocalStore, MemoryRemoteStore,
    OutboundMessage, RemoteDocument, RemoteStore, SessionHandle, StatusReport, StorageKeySpec,
    Subscription, SyncConfig, SyncController, SyncError, SyncState, ToolDescriptor, ToolId,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// One committed save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRecord {
    pub path: DocumentPath,
    pub storage: BTreeMap<String, Option<String>>,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct Script {
    saves: Mutex<Vec<SaveRecord>>,
    save_attempts: AtomicUsize,
    save_failures: Mutex<VecDeque<SyncError>>,
    load_failures: Mutex<VecDeque<SyncError>>,
    save_delay: Mutex<Duration>,
}

/// Memory remote with scripted failures and a save log
#[derive(Debug, Clone, Default)]
pub struct ScriptedRemote {
    store: MemoryRemoteStore,
    script: Arc<Script>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backing store, for writes that bypass the save log
    pub fn store(&self) -> &MemoryRemoteStore {
        &self.store
    }

    pub fn saves(&self) -> Vec<SaveRecord> {
        self.script.saves.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        self.script.saves.lock().len()
    }

    pub fn save_attempts(&self) -> usize {
        self.script.save_attempts.load(Ordering::SeqCst)
    }

    /// Fail the next save with `error`; queued failures apply in order
    pub fn fail_next_save(&self, error: SyncError) {
        self.script.save_failures.lock().push_back(error);
    }

    pub fn fail_next_load(&self, error: SyncError) {
        self.script.load_failures.lock().push_back(error);
    }

    /// Make every save take `delay` before it commits
    pub fn set_save_delay(&self, delay: Duration) {
        *self.script.save_delay.lock() = delay;
    }

    /// Seed a document through the backing store
    pub async fn seed(&self, path: &DocumentPath, entries: &[(&str, Option<&str>)]) {
        self.store
            .save(path, &storage(entries))
            .await
            .expect("memory store save");
    }
}

#[async_trait]
impl RemoteStore for ScriptedRemote {
    async fn load(&self, path: &DocumentPath) -> Result<Option<RemoteDocument>, SyncError> {
        let failure = self.script.load_failures.lock().pop_front();
        match failure {
            Some(e) => Err(e),
            None => self.store.load(path).await,
        }
    }

    async fn save(
        &self,
        path: &DocumentPath,
        storage: &BTreeMap<String, Option<String>>,
    ) -> Result<(), SyncError> {
        self.script.save_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.script.save_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failure = self.script.save_failures.lock().pop_front();
        if let Some(e) = failure {
            return Err(e);
        }
        self.store.save(path, storage).await?;
        self.script.saves.lock().push(SaveRecord {
            path: path.clone(),
            storage: storage.clone(),
            at: Instant::now(),
        });
        Ok(())
    }

    async fn subscribe(&self, path: &DocumentPath) -> Result<Subscription, SyncError> {
        self.store.subscribe(path).await
    }
}

/// Child channel that keeps every message
#[derive(Debug, Clone, Default)]
pub struct RecordingChild {
    messages: Arc<Mutex<Vec<OutboundMessage>>>,
}

impl RecordingChild {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().clone()
    }

    pub fn data_ready_count(&self) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| **m == OutboundMessage::DataReady)
            .count()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl ChildChannel for RecordingChild {
    fn post(&self, message: OutboundMessage) {
        self.messages.lock().push(message);
    }
}

/// One browser-like host: its own local store, child, and controller
pub struct Device {
    pub local: Arc<MemoryLocalStore>,
    pub child: RecordingChild,
    pub controller: SyncController,
}

impl Device {
    pub fn new(tool: ToolDescriptor, remote: &ScriptedRemote, config: SyncConfig) -> Self {
        let local = Arc::new(MemoryLocalStore::new());
        let child = RecordingChild::new();
        let controller = SyncController::new(
            tool,
            Arc::clone(&local) as Arc<dyn LocalStore>,
            Arc::new(remote.clone()),
            Arc::new(child.clone()),
            config,
        );
        Self {
            local,
            child,
            controller,
        }
    }

    pub fn sign_in(&mut self, identity: &str) {
        self.controller.set_identity(Some(Identity::new(identity)));
    }

    pub fn sign_out(&mut self) {
        self.controller.set_identity(None);
    }

    pub fn session(&self) -> &SessionHandle {
        self.controller.session().expect("no live session")
    }

    pub fn status(&self) -> StatusReport {
        self.controller.status().borrow().clone()
    }

    pub fn state(&self) -> SyncState {
        self.status().state
    }

    /// Tool-side write
    pub fn set(&self, key: &str, value: &str) {
        self.local.set_item(key, value);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.local.get_item(key)
    }
}

/// Tool with one per-identity key `plan_<identity>`
pub fn plan_tool() -> ToolDescriptor {
    ToolDescriptor::new("plan", "Plan", vec![StorageKeySpec::per_identity("plan_")])
}

pub fn doc_path(identity: &str, tool: &str) -> DocumentPath {
    DocumentPath::new(Identity::new(identity), ToolId::new(tool))
}

pub fn storage(entries: &[(&str, Option<&str>)]) -> BTreeMap<String, Option<String>> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.map(str::to_string)))
        .collect()
}

/// Let paused time run forward by `millis`
pub async fn advance_ms(millis: u64) {
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

/// Sleep until `start + millis`
pub async fn until_ms(start: Instant, millis: u64) {
    tokio::time::sleep_until(start + Duration::from_millis(millis)).await;
}

pub fn elapsed_ms(start: Instant, at: Instant) -> u128 {
    at.duration_since(start).as_millis()
}
