//! Plansync Core - tool state synchronization
//!
//! Keeps a sandboxed planning tool's local key-value state in sync with a
//! per-user remote document:
//! - Resolves the tool's storage keys for the signed-in identity
//! - Pulls the remote document into the local store on sign-in
//! - Polls the local store and pushes debounced changes
//! - Applies remote changes live without echoing them back
//! - Signals the tool instance when fresh data is in place
//!
//! # Example
//!
//! ```rust,ignore
//! use plansync_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let tool = ToolCatalog::builtin().get("strategic_canvas").cloned().unwrap();
//! let (child, _messages) = MpscChildChannel::new(32);
//! let mut controller = SyncController::new(
//!     tool,
//!     Arc::new(MemoryLocalStore::new()),
//!     Arc::new(MemoryRemoteStore::new()),
//!     Arc::new(child),
//!     SyncConfig::default(),
//! );
//!
//! controller.set_identity(Some(Identity::new("u1")));
//! println!("{:?}", controller.status().borrow().state);
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod controller;
pub mod error;
pub mod keys;
pub mod local;
pub mod protocol;
pub mod remote;
pub mod scheduler;
pub mod session;
pub mod snapshot;
pub mod state_machine;
pub mod types;

// Re-exports for convenience
pub use catalog::{ToolCatalog, ToolDescriptor};
pub use config::{RemoteConfig, SyncConfig};
pub use controller::SyncController;
pub use error::{ConfigError, ErrorKind, ErrorReport, StateMachineError, StoreError, SyncError};
pub use keys::{resolve_keys, ResolvedKeys};
pub use local::{FileLocalStore, LocalStore, MemoryLocalStore};
pub use protocol::{parse_inbound, ChildChannel, InboundMessage, MpscChildChannel, OutboundMessage};
pub use remote::{
    connect_remote, MemoryRemoteStore, RemoteDocument, RemoteEvent, RemoteStore, Subscription,
    UnsubscribeHandle,
};
pub use scheduler::{FireOutcome, PollOutcome, PushScheduler};
pub use session::{SessionGate, SessionHandle, StatusReport};
pub use snapshot::{SnapshotDigest, StorageSnapshot};
pub use state_machine::{allowed_transitions, validate_transition, SyncState};
pub use types::{DocumentPath, Identity, StorageKeySpec, ToolId};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for hosting a synchronized tool
    pub use crate::{
        ChildChannel, Identity, LocalStore, MemoryLocalStore, MemoryRemoteStore,
        MpscChildChannel, RemoteStore, SessionHandle, StatusReport, SyncConfig, SyncController,
        SyncError, SyncState, ToolCatalog, ToolDescriptor,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
