//! Messaging with the sandboxed tool instance
//!
//! Best-effort, one-way signals shaped `{ "type": ..., ...payload }`:
//! - out `SET_IDENTITY { identity }`: lets the instance resolve its keys
//! - out `DATA_READY`: the instance should re-read its keys
//! - in `IFRAME_READY`: the instance is listening
//!
//! Lost or duplicated signals are harmless; re-reading local state is
//! idempotent. Unknown inbound types are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Message sent to the tool instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    /// Signed-in identity for key resolution
    SetIdentity {
        /// Raw identity
        identity: String,
    },
    /// Local store holds fresh remote data
    DataReady,
}

impl OutboundMessage {
    /// Wire name
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::SetIdentity { .. } => "SET_IDENTITY",
            Self::DataReady => "DATA_READY",
        }
    }

    /// Wire form
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Message received from the tool instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundMessage {
    /// Instance finished loading and listens for messages
    IframeReady,
}

/// Parse an inbound message; `None` for unknown or untyped payloads
#[must_use]
pub fn parse_inbound(value: &Value) -> Option<InboundMessage> {
    match value.get("type").and_then(Value::as_str) {
        Some("IFRAME_READY") => Some(InboundMessage::IframeReady),
        Some(other) => {
            tracing::trace!(message_type = other, "ignoring unknown child message");
            None
        }
        None => None,
    }
}

/// Outbound side of the child channel
///
/// `post` never fails the caller; undeliverable messages are dropped.
#[cfg_attr(test, mockall::automock)]
pub trait ChildChannel: Send + Sync {
    /// Send one message
    fn post(&self, message: OutboundMessage);
}

/// Child channel backed by a bounded tokio queue
#[derive(Debug, Clone)]
pub struct MpscChildChannel {
    tx: mpsc::Sender<OutboundMessage>,
}

impl MpscChildChannel {
    /// Create channel and the receiver the tool bridge drains
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ChildChannel for MpscChildChannel {
    fn post(&self, message: OutboundMessage) {
        if let Err(e) = self.tx.try_send(message) {
            tracing::debug!(error = %e, "child message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shapes() {
        let set = OutboundMessage::SetIdentity {
            identity: "u1".into(),
        };
        assert_eq!(set.to_value(), json!({"type": "SET_IDENTITY", "identity": "u1"}));
        assert_eq!(
            OutboundMessage::DataReady.to_value(),
            json!({"type": "DATA_READY"})
        );
        assert_eq!(set.type_name(), "SET_IDENTITY");
    }

    #[test]
    fn inbound_is_forward_compatible() {
        assert_eq!(
            parse_inbound(&json!({"type": "IFRAME_READY", "extra": 1})),
            Some(InboundMessage::IframeReady)
        );
        assert_eq!(parse_inbound(&json!({"type": "RESIZE", "height": 10})), None);
        assert_eq!(parse_inbound(&json!("IFRAME_READY")), None);
        assert_eq!(parse_inbound(&json!({"type": 7})), None);
    }

    #[test]
    fn mpsc_channel_drops_when_full() {
        let (channel, mut rx) = MpscChildChannel::new(1);
        channel.post(OutboundMessage::DataReady);
        channel.post(OutboundMessage::DataReady);

        assert_eq!(rx.try_recv().ok(), Some(OutboundMessage::DataReady));
        assert!(rx.try_recv().is_err());
    }
}
