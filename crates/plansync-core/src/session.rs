//! Sync session
//!
//! One tokio task per `(identity, tool)` owns all session state and
//! multiplexes its event sources with `select!`:
//! - poll interval (local change detection)
//! - debounce deadline (coalesced push)
//! - settle deadline (end of loop suppression)
//! - the single in-flight save
//! - the remote subscription
//! - commands from the handle
//!
//! Every local-store write and status update goes through the
//! [`SessionGate`]; a torn-down session can never write into the keys or
//! status of the session that replaced it.

use crate::config::SyncConfig;
use crate::error::{ErrorReport, SyncError};
use crate::keys::ResolvedKeys;
use crate::local::LocalStore;
use crate::protocol::{ChildChannel, OutboundMessage};
use crate::remote::{RemoteDocument, RemoteEvent, RemoteStore, Subscription, UnsubscribeHandle};
use crate::scheduler::{FireOutcome, PollOutcome, PushScheduler};
use crate::snapshot::StorageSnapshot;
use crate::state_machine::{validate_transition, SyncState};
use crate::types::{DocumentPath, Identity, ToolId};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::future::pending;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn, Instrument};

type PushFuture = BoxFuture<'static, Result<(), SyncError>>;

/// Active-generation token shared by a controller and its sessions
#[derive(Debug, Clone, Default)]
pub struct SessionGate(Arc<Mutex<u64>>);

impl SessionGate {
    /// Create gate at generation 0
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation
    #[must_use]
    pub fn current(&self) -> u64 {
        *self.0.lock()
    }

    /// Retire the current generation; returns the new one
    pub fn advance(&self) -> u64 {
        let mut guard = self.0.lock();
        *guard += 1;
        *guard
    }

    /// Whether `generation` is still the active one
    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        *self.0.lock() == generation
    }

    /// Hold the gate for `generation`; `None` if it was retired.
    /// The generation cannot be retired while the guard lives.
    #[must_use]
    pub fn enter(&self, generation: u64) -> Option<MutexGuard<'_, u64>> {
        let guard = self.0.lock();
        (*guard == generation).then_some(guard)
    }
}

/// Session status for the UI; not authoritative for correctness
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Lifecycle state
    pub state: SyncState,
    /// Session generation the report belongs to
    pub generation: u64,
    /// Most recent error, cleared by the next successful push
    pub last_error: Option<ErrorReport>,
    /// Successful pushes this session
    pub pushes: u64,
    /// Remote snapshots written to the local store this session
    pub remote_applies: u64,
    /// Time of the last successful push
    pub last_pushed_at: Option<DateTime<Utc>>,
    /// Time of the last remote application
    pub last_applied_at: Option<DateTime<Utc>>,
}

impl StatusReport {
    /// Fresh report for `generation` in `state`
    #[must_use]
    pub fn new(state: SyncState, generation: u64) -> Self {
        Self {
            state,
            generation,
            last_error: None,
            pushes: 0,
            remote_applies: 0,
            last_pushed_at: None,
            last_applied_at: None,
        }
    }
}

impl Default for StatusReport {
    fn default() -> Self {
        Self::new(SyncState::SignedOut, 0)
    }
}

/// Collaborators and settings for one session
pub struct SessionContext {
    /// Tool being synchronized
    pub tool_id: ToolId,
    /// Signed-in identity
    pub identity: Identity,
    /// Resolved local keys
    pub keys: ResolvedKeys,
    /// Shared local store
    pub local: Arc<dyn LocalStore>,
    /// Remote document store
    pub remote: Arc<dyn RemoteStore>,
    /// Channel to the tool instance
    pub child: Arc<dyn ChildChannel>,
    /// Timings
    pub config: SyncConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Flush,
    LocalChanged,
    Retry,
}

/// Handle to a running session
///
/// Dropping the handle unsubscribes from the remote document and aborts the
/// session task.
#[derive(Debug)]
pub struct SessionHandle {
    generation: u64,
    commands: mpsc::UnboundedSender<Command>,
    unsubscribe: Arc<Mutex<Option<UnsubscribeHandle>>>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Generation this session runs under
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Push any pending change now, skipping the quiet period
    pub fn flush(&self) {
        self.send(Command::Flush);
    }

    /// Run a poll step now instead of waiting for the next tick
    pub fn local_changed(&self) {
        self.send(Command::LocalChanged);
    }

    /// Resume pushing after a permission or configuration fix
    pub fn retry(&self) {
        self.send(Command::Retry);
    }

    /// Whether the session task has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(?command, "session already stopped");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let handle = self.unsubscribe.lock().take();
        if let Some(handle) = handle {
            handle.unsubscribe();
        }
        self.task.abort();
    }
}

/// Start a session task under `generation`
///
/// Must be called from within a tokio runtime.
pub fn spawn_session(
    ctx: SessionContext,
    gate: SessionGate,
    generation: u64,
    status: Arc<watch::Sender<StatusReport>>,
) -> SessionHandle {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let unsubscribe = Arc::new(Mutex::new(None));
    let span = tracing::info_span!(
        "sync_session",
        tool_id = %ctx.tool_id,
        user = %ctx.identity.redacted(),
        generation
    );

    let session = Session {
        path: DocumentPath::new(ctx.identity.clone(), ctx.tool_id.clone()),
        scheduler: PushScheduler::new(ctx.config.debounce()),
        ctx,
        gate,
        generation,
        status,
        reconciled: false,
        settling: None,
        unsubscribe: Arc::clone(&unsubscribe),
    };
    let task = tokio::spawn(session.run(commands_rx).instrument(span));

    SessionHandle {
        generation,
        commands: commands_tx,
        unsubscribe,
        task,
    }
}

struct Session {
    ctx: SessionContext,
    path: DocumentPath,
    gate: SessionGate,
    generation: u64,
    status: Arc<watch::Sender<StatusReport>>,
    scheduler: PushScheduler,
    /// Local data has been reconciled with a remote answer; false after a
    /// failed initial load until the subscription delivers one
    reconciled: bool,
    /// End of the settle period after a remote application
    settling: Option<Instant>,
    unsubscribe: Arc<Mutex<Option<UnsubscribeHandle>>>,
}

async fn wait_in_flight(push: &mut Option<PushFuture>) -> Result<(), SyncError> {
    match push {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn next_event(subscription: &mut Option<Subscription>) -> Option<RemoteEvent> {
    match subscription {
        Some(sub) => sub.next().await,
        None => pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => pending().await,
    }
}

impl Session {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!("sync session started");
        if !self.initial_load().await {
            return;
        }
        let mut subscription = self.subscribe().await;
        if !self.handshake().await {
            return;
        }

        let period = self.ctx.config.poll_interval();
        let mut poll = tokio::time::interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight: Option<PushFuture> = None;

        loop {
            let debounce_at = if in_flight.is_none() {
                self.scheduler.deadline()
            } else {
                None
            };
            let settle_at = self.settling;

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Some(push) = self.on_command(command) {
                            in_flight = Some(push);
                        }
                    }
                    None => break,
                },
                result = wait_in_flight(&mut in_flight) => {
                    in_flight = None;
                    self.finish_push(result);
                }
                event = next_event(&mut subscription) => {
                    if !self.on_remote_event(event) {
                        subscription = None;
                    }
                }
                () = sleep_until_opt(settle_at) => self.end_settle(),
                () = sleep_until_opt(debounce_at) => {
                    if let Some(push) = self.on_debounce() {
                        in_flight = Some(push);
                    }
                }
                _ = poll.tick() => {
                    if subscription.is_none() {
                        subscription = self.subscribe().await;
                    }
                    self.on_poll();
                }
            }

            if !self.gate.is_current(self.generation) {
                break;
            }
        }
        debug!("sync session stopped");
    }

    /// `loading`: reconcile the local store with the remote document.
    /// Returns `false` if the session was retired meanwhile.
    async fn initial_load(&mut self) -> bool {
        let result = self.ctx.remote.load(&self.path).await;
        let keys = &self.ctx.keys;

        match result {
            Ok(Some(doc)) => match doc.project(keys) {
                Some(projected) => {
                    let applied = {
                        let Some(_gate) = self.gate.enter(self.generation) else {
                            return false;
                        };
                        self.ctx.local.stage_and_read(projected.as_map(), keys)
                    };
                    self.ctx.local.persist();
                    self.scheduler.set_baseline(applied.digest());
                    self.reconciled = true;
                    self.update_status(|s| {
                        s.remote_applies += 1;
                        s.last_applied_at = Some(Utc::now());
                    });
                    info!(digest = %applied.digest().short(), "loaded remote document");
                }
                None => self.adopt_local_state("remote document has none of the tool keys"),
            },
            Ok(None) => self.adopt_local_state("no remote document yet"),
            Err(e @ SyncError::Malformed { .. }) => {
                warn!(error = %e, "ignoring unusable remote document");
                self.adopt_local_state("remote document unusable");
            }
            Err(e) => {
                // keep local data until the subscription answers
                if e.requires_user_action() {
                    self.scheduler.block();
                }
                self.record_error(&e);
                let current = self.ctx.local.read(keys).digest();
                self.scheduler.set_baseline(current);
            }
        }
        self.gate.is_current(self.generation)
    }

    /// Local state becomes the baseline the first push establishes remotely
    fn adopt_local_state(&mut self, reason: &'static str) {
        let nothing = StorageSnapshot::absent(self.ctx.keys.iter());
        self.scheduler.set_baseline(nothing.digest());
        self.reconciled = true;
        info!(reason, "starting from local data");
    }

    /// `SET_IDENTITY`, short pause, then `DATA_READY`
    async fn handshake(&mut self) -> bool {
        self.ctx.child.post(OutboundMessage::SetIdentity {
            identity: self.ctx.identity.as_str().to_owned(),
        });
        tokio::time::sleep(self.ctx.config.handshake_delay()).await;
        if !self.gate.is_current(self.generation) {
            return false;
        }
        self.ctx.child.post(OutboundMessage::DataReady);
        if self.status.borrow().state == SyncState::Loading {
            self.set_state(SyncState::Ready);
        }
        true
    }

    async fn subscribe(&mut self) -> Option<Subscription> {
        match self.ctx.remote.subscribe(&self.path).await {
            Ok(subscription) => {
                if !self.gate.is_current(self.generation) {
                    subscription.unsubscribe();
                    return None;
                }
                *self.unsubscribe.lock() = Some(subscription.handle());
                debug!("subscribed to remote document");
                self.recover_from_transient_error();
                Some(subscription)
            }
            Err(e) => {
                self.record_error(&e);
                None
            }
        }
    }

    fn read_local(&self) -> StorageSnapshot {
        self.ctx.local.read(&self.ctx.keys)
    }

    fn on_poll(&mut self) {
        let snapshot = self.read_local();
        let digest = snapshot.digest();
        match self.scheduler.observe(digest, Instant::now()) {
            PollOutcome::Armed(_) => {
                debug!(digest = %digest.short(), "local change detected, debounce armed");
            }
            outcome => trace!(?outcome, "poll"),
        }
    }

    fn on_debounce(&mut self) -> Option<PushFuture> {
        let snapshot = self.read_local();
        match self.scheduler.on_deadline(snapshot.digest(), Instant::now()) {
            FireOutcome::Push(_) => Some(self.start_push(snapshot)),
            FireOutcome::Rearmed(_) => {
                debug!("local store changed during quiet period, debounce restarted");
                None
            }
            FireOutcome::Idle | FireOutcome::Deferred => None,
        }
    }

    fn on_command(&mut self, command: Command) -> Option<PushFuture> {
        match command {
            Command::Flush => {
                let snapshot = self.read_local();
                self.scheduler
                    .flush(snapshot.digest(), Instant::now())
                    .map(|_| self.start_push(snapshot))
            }
            Command::LocalChanged => {
                self.on_poll();
                None
            }
            Command::Retry => {
                if self.scheduler.is_blocked() {
                    info!("pushing resumed by user");
                    self.scheduler.unblock();
                }
                self.on_poll();
                None
            }
        }
    }

    fn start_push(&mut self, snapshot: StorageSnapshot) -> PushFuture {
        self.set_state(SyncState::Saving);
        debug!(digest = %snapshot.digest().short(), "pushing local snapshot");

        let remote = Arc::clone(&self.ctx.remote);
        let path = self.path.clone();
        let storage = snapshot.into_map();
        async move { remote.save(&path, &storage).await }.boxed()
    }

    fn finish_push(&mut self, result: Result<(), SyncError>) {
        match result {
            Ok(()) => {
                let pushed = self.scheduler.complete(true);
                self.update_status(|s| {
                    s.pushes += 1;
                    s.last_pushed_at = Some(Utc::now());
                    s.last_error = None;
                });
                self.set_state(SyncState::Ready);
                if let Some(digest) = pushed {
                    info!(digest = %digest.short(), "pushed local snapshot");
                }
            }
            Err(e) => {
                self.scheduler.complete(false);
                if e.requires_user_action() {
                    self.scheduler.block();
                }
                self.record_error(&e);
            }
        }
    }

    /// Returns `false` when the subscription is gone
    fn on_remote_event(&mut self, event: Option<RemoteEvent>) -> bool {
        match event {
            None => {
                self.unsubscribe.lock().take();
                self.record_error(&SyncError::SubscriptionClosed);
                false
            }
            Some(RemoteEvent::Missing) => {
                if self.reconciled {
                    trace!("remote document absent");
                } else {
                    self.adopt_local_state("no remote document yet");
                }
                true
            }
            Some(RemoteEvent::Error(e @ SyncError::Malformed { .. })) => {
                warn!(error = %e, "ignoring unusable remote document");
                if !self.reconciled {
                    self.adopt_local_state("remote document unusable");
                }
                true
            }
            Some(RemoteEvent::Error(e)) => {
                self.record_error(&e);
                true
            }
            Some(RemoteEvent::Document(doc)) => {
                self.apply_remote(&doc);
                true
            }
        }
    }

    fn apply_remote(&mut self, doc: &RemoteDocument) {
        let Some(projected) = doc.project(&self.ctx.keys) else {
            if self.reconciled {
                trace!("remote document has none of the tool keys");
            } else {
                self.adopt_local_state("remote document has none of the tool keys");
            }
            return;
        };
        let incoming = projected.digest();
        self.reconciled = true;

        if self.scheduler.is_echo(incoming) {
            trace!(digest = %incoming.short(), "remote state already applied");
            return;
        }
        if self.read_local().digest() == incoming {
            self.scheduler.set_baseline(incoming);
            return;
        }

        let applied = {
            let Some(_gate) = self.gate.enter(self.generation) else {
                return;
            };
            self.ctx.local.stage_and_read(projected.as_map(), &self.ctx.keys)
        };
        self.ctx.local.persist();
        let applied_digest = applied.digest();
        self.scheduler.begin_remote_apply(applied_digest);
        self.settling = Some(Instant::now() + self.ctx.config.settle());
        self.ctx.child.post(OutboundMessage::DataReady);
        self.update_status(|s| {
            s.remote_applies += 1;
            s.last_applied_at = Some(Utc::now());
        });
        info!(digest = %applied_digest.short(), "applied remote snapshot");
        self.recover_from_transient_error();
    }

    fn end_settle(&mut self) {
        if self.settling.take().is_some() {
            self.scheduler.end_remote_apply();
            trace!("remote application settled");
        }
    }

    /// Backend reachable again; a transient error no longer describes the
    /// session. Errors that need user action stay.
    fn recover_from_transient_error(&self) {
        let recovering = {
            let status = self.status.borrow();
            status.state == SyncState::Error
                && status.last_error.as_ref().is_some_and(|e| e.kind.is_transient())
        };
        if recovering {
            info!("backend reachable again");
            self.update_status(|s| s.last_error = None);
            self.set_state(SyncState::Ready);
        }
    }

    fn record_error(&self, e: &SyncError) {
        if e.requires_user_action() {
            error!(kind = ?e.kind(), error = %e, "sync failed, user action required");
        } else {
            warn!(kind = ?e.kind(), error = %e, "sync failed, will retry");
        }
        let report = ErrorReport::from(e);
        self.update_status(|s| {
            if validate_transition(s.state, SyncState::Error).is_ok() {
                s.state = SyncState::Error;
            }
            s.last_error = Some(report);
        });
    }

    fn set_state(&self, to: SyncState) {
        self.update_status(|s| match validate_transition(s.state, to) {
            Ok(()) => {
                if s.state != to {
                    debug!(from = %s.state, to = %to, "sync state");
                }
                s.state = to;
            }
            Err(e) => warn!(error = %e, "transition rejected"),
        });
    }

    fn update_status(&self, f: impl FnOnce(&mut StatusReport)) {
        let Some(_gate) = self.gate.enter(self.generation) else {
            return;
        };
        self.status.send_modify(f);
    }
}
