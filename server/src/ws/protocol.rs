//! WebSocket session protocol: decoding client events and driving the
//! `Unregistered -> Registered -> Closed` state machine.

use axum::extract::ws::Message;
use serde::Deserialize;

use crate::delivery::{self, DeliveryResult, OutboundMessage};
use crate::error::RelayError;
use crate::events::PeerEvent;
use crate::identity::{parse_peer_id, PeerId};
use crate::registry::{BidirectionalHandle, ConnectionSender, PeerRegistry, SessionId};

/// Events a client may send. Fields are optional so that a missing field is
/// reported as such rather than as undecodable JSON.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Register {
        #[serde(default)]
        uuid: Option<String>,
    },
    Message {
        #[serde(default)]
        to_uuid: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },
}

/// Decode a text frame into a [`ClientEvent`].
pub fn decode_client_event(text: &str) -> Result<ClientEvent, RelayError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|_| RelayError::InvalidPayload("Invalid JSON event".to_string()))?;
    serde_json::from_value(value)
        .map_err(|_| RelayError::InvalidPayload("Unknown event type".to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Registered(PeerId),
    Closed,
}

/// Per-connection protocol state.
///
/// Owns the connection's registry slot: dropping the session releases it, so
/// the slot is cleared on every exit path of the connection task, including
/// panics and aborts.
pub struct Session {
    id: SessionId,
    tx: ConnectionSender,
    registry: PeerRegistry,
    state: SessionState,
}

impl Session {
    pub fn new(registry: PeerRegistry, tx: ConnectionSender) -> Self {
        Self {
            id: SessionId::next(),
            tx,
            registry,
            state: SessionState::Unregistered,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle one text frame and queue the reply on this session's channel.
    pub fn handle_text(&mut self, text: &str) {
        let reply = decode_client_event(text).and_then(|event| self.dispatch(event));
        match reply {
            Ok(event) => self.send(&event),
            Err(err) => {
                tracing::debug!(session_id = %self.id, error = %err, "Rejected client event");
                self.send(&PeerEvent::error(err.to_string()));
            }
        }
    }

    /// Events are JSON text frames only.
    pub fn reject_binary(&self) {
        self.send(&PeerEvent::error("Binary frames are not supported"));
    }

    fn dispatch(&mut self, event: ClientEvent) -> Result<PeerEvent, RelayError> {
        match event {
            ClientEvent::Register { uuid } => self.register(uuid),
            ClientEvent::Message { to_uuid, text } => self.send_message(to_uuid, text),
        }
    }

    fn register(&mut self, uuid: Option<String>) -> Result<PeerEvent, RelayError> {
        let uuid = non_empty(uuid).ok_or(RelayError::MissingField(&["UUID"]))?;
        let peer = parse_peer_id(&uuid)?;

        // A session holds at most one identity at a time.
        if let SessionState::Registered(previous) = self.state {
            if previous != peer {
                self.registry.unregister_bidirectional(previous, self.id);
            }
        }

        self.registry
            .register_bidirectional(peer, BidirectionalHandle::new(self.id, self.tx.clone()));
        self.state = SessionState::Registered(peer);
        tracing::info!(peer_id = %peer, session_id = %self.id, "WebSocket registered");

        Ok(PeerEvent::Registered { uuid: peer })
    }

    fn send_message(
        &self,
        to_uuid: Option<String>,
        text: Option<String>,
    ) -> Result<PeerEvent, RelayError> {
        let from = match self.state {
            SessionState::Registered(peer) => peer,
            SessionState::Unregistered | SessionState::Closed => {
                return Err(RelayError::NotRegistered)
            }
        };

        let (to_uuid, text) = match (non_empty(to_uuid), non_empty(text)) {
            (Some(to_uuid), Some(text)) => (to_uuid, text),
            _ => return Err(RelayError::MissingField(&["to_uuid", "text"])),
        };
        let to = parse_peer_id(&to_uuid)?;

        match delivery::deliver(&self.registry, OutboundMessage { from, to, text }) {
            DeliveryResult::Delivered => Ok(PeerEvent::MessageSent { to_uuid: to }),
            DeliveryResult::PeerOffline => Err(RelayError::PeerOffline(to)),
        }
    }

    fn send(&self, event: &PeerEvent) {
        let _ = self.tx.send(Message::Text(event.to_json().into()));
    }

    /// Release the registry slot, if any. Safe to call more than once.
    pub fn close(&mut self) {
        if let SessionState::Registered(peer) = self.state {
            if self.registry.unregister_bidirectional(peer, self.id) {
                tracing::info!(peer_id = %peer, session_id = %self.id, "WebSocket unregistered");
            }
        }
        self.state = SessionState::Closed;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PushHandle;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    fn session(registry: &PeerRegistry) -> (Session, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Session::new(registry.clone(), tx), rx)
    }

    fn next_reply(rx: &mut mpsc::UnboundedReceiver<Message>) -> Value {
        match rx.try_recv().expect("expected a reply") {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    fn register_json(peer: &PeerId) -> String {
        json!({"type": "register", "uuid": peer.to_string()}).to_string()
    }

    #[test]
    fn test_decode_events() {
        assert_eq!(
            decode_client_event(r#"{"type":"register","uuid":"abc"}"#).unwrap(),
            ClientEvent::Register {
                uuid: Some("abc".into())
            }
        );
        assert_eq!(
            decode_client_event(r#"{"type":"message"}"#).unwrap(),
            ClientEvent::Message {
                to_uuid: None,
                text: None
            }
        );
        assert!(matches!(
            decode_client_event("not json"),
            Err(RelayError::InvalidPayload(_))
        ));
        assert!(matches!(
            decode_client_event(r#"{"type":"subscribe"}"#),
            Err(RelayError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_register_acknowledges_and_installs_slot() {
        let registry = PeerRegistry::new();
        let (mut session, mut rx) = session(&registry);
        let peer = PeerId::new_v4();

        session.handle_text(&register_json(&peer));

        assert_eq!(
            next_reply(&mut rx),
            json!({"type": "registered", "uuid": peer.to_string()})
        );
        assert_eq!(session.state(), SessionState::Registered(peer));
        assert!(registry.lookup(&peer).bidirectional.is_some());
    }

    #[test]
    fn test_register_rejects_missing_and_invalid_uuid() {
        let registry = PeerRegistry::new();
        let (mut session, mut rx) = session(&registry);

        session.handle_text(r#"{"type":"register"}"#);
        assert_eq!(next_reply(&mut rx)["message"], "UUID is required");

        session.handle_text(r#"{"type":"register","uuid":"not-a-uuid"}"#);
        assert_eq!(next_reply(&mut rx)["message"], "Invalid UUID");

        assert_eq!(session.state(), SessionState::Unregistered);
        assert_eq!(registry.online_count(), 0);
    }

    #[test]
    fn test_message_before_register_is_rejected() {
        let registry = PeerRegistry::new();
        let target = PeerId::new_v4();
        let (push_tx, mut push_rx) = mpsc::unbounded_channel();
        registry.register_push(target, PushHandle::new(SessionId::next(), push_tx));

        let (mut session, mut rx) = session(&registry);
        session.handle_text(
            &json!({"type": "message", "to_uuid": target.to_string(), "text": "hi"}).to_string(),
        );

        assert_eq!(
            next_reply(&mut rx),
            json!({"type": "error", "message": "Register first"})
        );
        assert!(push_rx.try_recv().is_err(), "no delivery should be attempted");
    }

    #[test]
    fn test_message_validation() {
        let registry = PeerRegistry::new();
        let (mut session, mut rx) = session(&registry);
        session.handle_text(&register_json(&PeerId::new_v4()));
        next_reply(&mut rx);

        session.handle_text(r#"{"type":"message","to_uuid":"","text":"hi"}"#);
        assert_eq!(next_reply(&mut rx)["message"], "to_uuid and text are required");

        session.handle_text(r#"{"type":"message","to_uuid":"not-a-uuid","text":"hi"}"#);
        assert_eq!(next_reply(&mut rx)["message"], "Invalid UUID");

        let offline = PeerId::new_v4();
        session.handle_text(
            &json!({"type": "message", "to_uuid": offline.to_string(), "text": "hi"}).to_string(),
        );
        assert_eq!(
            next_reply(&mut rx)["message"],
            format!("Peer {} is not online", offline)
        );
    }

    #[test]
    fn test_message_between_sessions() {
        let registry = PeerRegistry::new();
        let (a, b) = (PeerId::new_v4(), PeerId::new_v4());
        let (mut session_a, mut rx_a) = session(&registry);
        let (mut session_b, mut rx_b) = session(&registry);
        session_a.handle_text(&register_json(&a));
        session_b.handle_text(&register_json(&b));
        next_reply(&mut rx_a);
        next_reply(&mut rx_b);

        session_a.handle_text(
            &json!({"type": "message", "to_uuid": b.to_string(), "text": "hi"}).to_string(),
        );

        assert_eq!(
            next_reply(&mut rx_a),
            json!({"type": "message_sent", "to_uuid": b.to_string()})
        );
        assert_eq!(
            next_reply(&mut rx_b),
            json!({"type": "message", "from_uuid": a.to_string(), "text": "hi"})
        );
    }

    #[test]
    fn test_reregister_moves_identity() {
        let registry = PeerRegistry::new();
        let (first, second) = (PeerId::new_v4(), PeerId::new_v4());
        let (mut session, _rx) = session(&registry);

        session.handle_text(&register_json(&first));
        session.handle_text(&register_json(&second));

        assert!(!registry.is_online(&first));
        assert!(registry.is_online(&second));
    }

    #[test]
    fn test_drop_releases_only_own_slot() {
        let registry = PeerRegistry::new();
        let peer = PeerId::new_v4();
        let (push_tx, _push_rx) = mpsc::unbounded_channel();
        registry.register_push(peer, PushHandle::new(SessionId::next(), push_tx));

        let (mut session, _rx) = session(&registry);
        session.handle_text(&register_json(&peer));
        drop(session);

        let slots = registry.lookup(&peer);
        assert!(slots.bidirectional.is_none());
        assert!(slots.push.is_some());
    }

    #[test]
    fn test_superseded_session_does_not_evict_newer() {
        let registry = PeerRegistry::new();
        let peer = PeerId::new_v4();
        let (mut old, _rx_old) = session(&registry);
        let (mut new, _rx_new) = session(&registry);
        old.handle_text(&register_json(&peer));
        new.handle_text(&register_json(&peer));

        old.close();
        old.close();

        assert_eq!(
            registry.lookup(&peer).bidirectional.map(|h| h.session()),
            Some(new.id())
        );
    }
}
