//! Sync session lifecycle states
//!
//! ```text
//! signed_out → loading → ready ⇄ saving
//!                  ╲        ╲      ╱
//!                   ─────── error ─
//! ```
//!
//! Any state returns to `signed_out` when the identity goes away.

use crate::error::StateMachineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of one tool's synchronization session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No identity; nothing is synchronized
    SignedOut,
    /// Initial remote load in progress
    Loading,
    /// Idle, local and remote reconciled
    Ready,
    /// One outbound write in flight
    Saving,
    /// Last operation failed; polling and subscription keep running
    Error,
}

impl SyncState {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SignedOut => "signed_out",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Saving => "saving",
            Self::Error => "error",
        }
    }

    /// Whether a session task exists in this state
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::SignedOut)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates a state transition.
///
/// Staying in the same state is not a transition and is always accepted.
///
/// # Errors
/// Returns `IllegalTransition` if `to` is not a successor of `from`
pub fn validate_transition(from: SyncState, to: SyncState) -> Result<(), StateMachineError> {
    if from == to || allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

/// Legal successors of `from`
#[must_use]
pub fn allowed_transitions(from: SyncState) -> Vec<SyncState> {
    use SyncState::*;
    match from {
        SignedOut => vec![Loading],
        Loading => vec![Ready, Error, SignedOut],
        Ready => vec![Saving, Error, SignedOut],
        Saving => vec![Ready, Error, SignedOut],
        Error => vec![Saving, Ready, SignedOut],
    }
}
