//! JSON events sent from the server to peers, on either transport.

use serde::Serialize;

use crate::identity::PeerId;

/// An outbound event. Serialized with a `type` tag, e.g.
/// `{"type":"message","from_uuid":"...","text":"hi"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerEvent {
    /// Acknowledges a WebSocket `register`.
    Registered { uuid: PeerId },
    /// First event on a push subscription.
    Connected { uuid: PeerId },
    /// A text message from another peer.
    Message { from_uuid: PeerId, text: String },
    /// The recipient accepted a message sent over WebSocket.
    MessageSent { to_uuid: PeerId },
    Error { message: String },
}

impl PeerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Every variant is plain strings and identifiers, so this cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}
