//! Core types for the sync engine
//!
//! - Signed-in identity and tool identifiers
//! - Storage key declarations
//! - Remote document addressing

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable per-user identifier supplied by the identity provider
///
/// Opaque to the engine. `Debug` prints a digest only, so the raw value
/// never ends up in logs.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wrap a provider identifier
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short blake3 digest, safe for logs
    #[must_use]
    pub fn redacted(&self) -> String {
        let hash = blake3::hash(self.0.as_bytes());
        hex::encode(&hash.as_bytes()[..4])
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.redacted())
    }
}

/// Planning tool identifier (e.g. `strategic_canvas`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolId(String);

impl ToolId {
    /// Create tool ID
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ToolId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Declaration of one logical storage key
///
/// Serialized the way tool pages declare them: `{"kind":"global","key":..}`
/// or `{"kind":"uid","prefix":..}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageKeySpec {
    /// Same literal key for every identity
    Global {
        /// Concrete key
        key: String,
    },
    /// Concrete key is `prefix + identity`
    #[serde(rename = "uid", alias = "per_identity")]
    PerIdentity {
        /// Key prefix
        prefix: String,
    },
}

impl StorageKeySpec {
    /// Global key declaration
    #[inline]
    #[must_use]
    pub fn global(key: impl Into<String>) -> Self {
        Self::Global { key: key.into() }
    }

    /// Per-identity key declaration
    #[inline]
    #[must_use]
    pub fn per_identity(prefix: impl Into<String>) -> Self {
        Self::PerIdentity {
            prefix: prefix.into(),
        }
    }

    /// Whether resolution needs a signed-in identity
    #[inline]
    #[must_use]
    pub fn needs_identity(&self) -> bool {
        matches!(self, Self::PerIdentity { .. })
    }
}

/// Address of a remote tool document: `users/{identity}/tools/{toolId}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    /// Owning identity
    pub identity: Identity,
    /// Tool the document belongs to
    pub tool_id: ToolId,
}

impl DocumentPath {
    /// Collection holding per-user documents
    pub const USERS: &'static str = "users";
    /// Sub-collection holding per-tool documents
    pub const TOOLS: &'static str = "tools";

    /// Create document path
    #[inline]
    #[must_use]
    pub fn new(identity: Identity, tool_id: ToolId) -> Self {
        Self { identity, tool_id }
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            Self::USERS,
            self.identity.as_str(),
            Self::TOOLS,
            self.tool_id
        )
    }
}
