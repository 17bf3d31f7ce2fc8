//! Error types for the sync engine
//!
//! Provides error handling for:
//! - Remote document store failures (load/save/subscribe)
//! - Sync state machine transitions
//! - Local store persistence
//! - Configuration loading

use crate::state_machine::SyncState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Remote synchronization error
///
/// Every variant is a distinct reported kind; none of them is swallowed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Network or connectivity failure
    #[error("remote backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Authentication or rules rejection
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// No backend endpoint available
    #[error("remote backend not configured: {0}")]
    NotConfigured(String),

    /// Unexpected document shape
    #[error("malformed remote document for tool '{tool_id}': {reason}")]
    Malformed {
        /// Tool whose document failed to decode
        tool_id: String,
        /// Decoder message
        reason: String,
    },

    /// Backend quota or capacity error
    #[error("remote quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Backend closed a live subscription
    #[error("remote subscription closed by backend")]
    SubscriptionClosed,
}

impl SyncError {
    /// Create malformed-document error
    pub fn malformed(tool_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            tool_id: tool_id.into(),
            reason: reason.into(),
        }
    }

    /// Classification used by the status surface
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::NotConfigured(_) => ErrorKind::NotConfigured,
            Self::Malformed { .. } => ErrorKind::Malformed,
            Self::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            Self::SubscriptionClosed => ErrorKind::SubscriptionClosed,
        }
    }

    /// Check if the next poll/debounce cycle may retry the operation
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::QuotaExceeded(_) | Self::SubscriptionClosed
        )
    }

    /// Check if the error needs re-authentication or a configuration fix
    #[inline]
    #[must_use]
    pub fn requires_user_action(&self) -> bool {
        matches!(self, Self::PermissionDenied(_) | Self::NotConfigured(_))
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network/connectivity
    BackendUnavailable,
    /// Auth/rules rejection
    PermissionDenied,
    /// No backend endpoint
    NotConfigured,
    /// Unusable document shape
    Malformed,
    /// Quota/backend capacity
    QuotaExceeded,
    /// Subscription forcibly closed
    SubscriptionClosed,
}

impl ErrorKind {
    /// Whether the condition clears on its own once the backend recovers
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable | Self::QuotaExceeded | Self::SubscriptionClosed
        )
    }
}

/// Last error as shown on the status surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Error classification
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
    /// When the error was recorded
    pub at: DateTime<Utc>,
}

impl From<&SyncError> for ErrorReport {
    fn from(error: &SyncError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            at: Utc::now(),
        }
    }
}

/// State machine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// Transition not in the allowed table
    #[error("illegal sync state transition: {from} -> {to}")]
    IllegalTransition {
        /// Current state
        from: SyncState,
        /// Requested state
        to: SyncState,
    },
}

/// Persistent local store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error on the backing file
    #[error("io error on {path}: {source}")]
    Io {
        /// Backing file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Backing file is not a flat string map
    #[error("invalid store file {path}: {source}")]
    Json {
        /// Backing file
        path: PathBuf,
        /// Decoder error
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML did not parse
    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration could not be rendered
    #[error("cannot render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    /// Configuration file unreadable
    #[error("cannot read configuration {path}: {source}")]
    Io {
        /// Configuration file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Environment override is not a number
    #[error("environment variable {var} has invalid value '{value}'")]
    Env {
        /// Variable name
        var: String,
        /// Offending value
        value: String,
    },

    /// Value out of range
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classes_are_disjoint() {
        let transient = [
            SyncError::BackendUnavailable("offline".into()),
            SyncError::QuotaExceeded("writes".into()),
            SyncError::SubscriptionClosed,
        ];
        for e in &transient {
            assert!(e.is_retryable(), "{e}");
            assert!(!e.requires_user_action(), "{e}");
        }

        let blocking = [
            SyncError::PermissionDenied("rules".into()),
            SyncError::NotConfigured("no endpoint".into()),
        ];
        for e in &blocking {
            assert!(!e.is_retryable(), "{e}");
            assert!(e.requires_user_action(), "{e}");
        }

        let malformed = SyncError::malformed("swot", "storage is not a map");
        assert!(!malformed.is_retryable());
        assert!(!malformed.requires_user_action());
    }

    #[test]
    fn report_carries_kind() {
        let report = ErrorReport::from(&SyncError::PermissionDenied("rules".into()));
        assert_eq!(report.kind, ErrorKind::PermissionDenied);
        assert!(report.message.contains("rules"));
    }
}
