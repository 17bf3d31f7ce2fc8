//! Identity-following controller for one tool view
//!
//! Owns at most one live session. Any identity change tears the current
//! session down synchronously before the next one starts:
//! 1. the session gate advances, so the old task can no longer write
//! 2. the remote subscription is released
//! 3. the old task is aborted
//!
//! Must be used from within a tokio runtime.

use crate::catalog::ToolDescriptor;
use crate::config::SyncConfig;
use crate::local::LocalStore;
use crate::protocol::{parse_inbound, ChildChannel, InboundMessage, OutboundMessage};
use crate::remote::RemoteStore;
use crate::session::{spawn_session, SessionContext, SessionGate, SessionHandle, StatusReport};
use crate::state_machine::SyncState;
use crate::types::Identity;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Binds a tool view to its stores and follows the signed-in identity
pub struct SyncController {
    tool: ToolDescriptor,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    child: Arc<dyn ChildChannel>,
    config: SyncConfig,
    gate: SessionGate,
    status: Arc<watch::Sender<StatusReport>>,
    identity: Option<Identity>,
    session: Option<SessionHandle>,
}

impl SyncController {
    /// Create controller; no session runs until an identity is set
    #[must_use]
    pub fn new(
        tool: ToolDescriptor,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        child: Arc<dyn ChildChannel>,
        config: SyncConfig,
    ) -> Self {
        let (status, _) = watch::channel(StatusReport::default());
        Self {
            tool,
            local,
            remote,
            child,
            config,
            gate: SessionGate::new(),
            status: Arc::new(status),
            identity: None,
            session: None,
        }
    }

    /// Tool this controller serves
    #[inline]
    #[must_use]
    pub fn tool(&self) -> &ToolDescriptor {
        &self.tool
    }

    /// Status stream for the UI
    #[must_use]
    pub fn status(&self) -> watch::Receiver<StatusReport> {
        self.status.subscribe()
    }

    /// Current identity, `None` for guests
    #[inline]
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Live session, if any
    #[inline]
    #[must_use]
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    /// React to an identity change
    ///
    /// Re-setting the identity a session already runs for is a no-op.
    pub fn set_identity(&mut self, identity: Option<Identity>) {
        if identity == self.identity && (identity.is_none() || self.session.is_some()) {
            return;
        }
        self.teardown();
        self.identity = identity;

        let Some(identity) = self.identity.clone() else {
            debug!(tool_id = %self.tool.id, "guest, sync disabled");
            return;
        };
        if !self.tool.syncs() {
            debug!(tool_id = %self.tool.id, "tool declares no storage keys, sync disabled");
            return;
        }
        let Some(keys) = self.tool.resolve(Some(&identity)) else {
            return;
        };

        let generation = self.gate.current();
        self.status
            .send_replace(StatusReport::new(SyncState::Loading, generation));
        let ctx = SessionContext {
            tool_id: self.tool.id.clone(),
            identity,
            keys,
            local: Arc::clone(&self.local),
            remote: Arc::clone(&self.remote),
            child: Arc::clone(&self.child),
            config: self.config.clone(),
        };
        self.session = Some(spawn_session(
            ctx,
            self.gate.clone(),
            generation,
            Arc::clone(&self.status),
        ));
    }

    /// Follow an identity provider until it goes away, then shut down
    pub async fn follow(&mut self, mut identities: watch::Receiver<Option<Identity>>) {
        let initial = identities.borrow_and_update().clone();
        self.set_identity(initial);
        while identities.changed().await.is_ok() {
            let next = identities.borrow_and_update().clone();
            self.set_identity(next);
        }
        self.shutdown();
    }

    /// Handle a message from the tool instance
    pub fn handle_child_message(&self, message: &Value) {
        if parse_inbound(message) == Some(InboundMessage::IframeReady) {
            // instance (re)loaded; it needs the identity to resolve its keys
            if let Some(identity) = &self.identity {
                self.child.post(OutboundMessage::SetIdentity {
                    identity: identity.as_str().to_owned(),
                });
            }
        }
    }

    /// View unmounted
    pub fn shutdown(&mut self) {
        self.teardown();
        self.identity = None;
    }

    fn teardown(&mut self) {
        let generation = self.gate.advance();
        if let Some(session) = self.session.take() {
            drop(session);
            info!(tool_id = %self.tool.id, generation = generation - 1, "sync session torn down");
        }
        self.status
            .send_replace(StatusReport::new(SyncState::SignedOut, generation));
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        self.gate.advance();
    }
}
