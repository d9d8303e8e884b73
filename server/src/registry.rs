//! Peer registry: which live delivery slots each peer identifier currently has.
//!
//! Each peer may hold at most one WebSocket slot and at most one push (SSE)
//! slot. The registry only stores sender halves; the receiving half belongs
//! to the session that created it, so dropping the session closes the
//! channel even if a stale handle is still sitting here.
//!
//! Handles are tagged with the [`SessionId`] that installed them. Unregistering
//! is scoped to that session, so a session that was superseded by a newer
//! registration for the same peer cannot evict the newer slot on its way out.

use axum::extract::ws::Message;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::events::PeerEvent;
use crate::identity::PeerId;

/// Sender half of a WebSocket session's outbound channel.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Sender half of a push subscriber's queue.
pub type PushSender = mpsc::UnboundedSender<PeerEvent>;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one WebSocket session or push subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// WebSocket slot. Writes are non-blocking; they go to the session's writer task.
#[derive(Debug, Clone)]
pub struct BidirectionalHandle {
    session: SessionId,
    tx: ConnectionSender,
}

impl BidirectionalHandle {
    pub fn new(session: SessionId, tx: ConnectionSender) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Queue `event` as a JSON text frame. Returns false if the session is gone.
    pub fn send_event(&self, event: &PeerEvent) -> bool {
        self.tx.send(Message::Text(event.to_json().into())).is_ok()
    }
}

/// Push slot backed by an unbounded queue drained by the SSE stream.
#[derive(Debug, Clone)]
pub struct PushHandle {
    session: SessionId,
    tx: PushSender,
}

impl PushHandle {
    pub fn new(session: SessionId, tx: PushSender) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Enqueue `event`. Only fails once the subscriber's stream has been dropped.
    pub fn enqueue(&self, event: PeerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Snapshot of a peer's slots.
#[derive(Debug, Clone, Default)]
pub struct PeerSlots {
    pub bidirectional: Option<BidirectionalHandle>,
    pub push: Option<PushHandle>,
}

impl PeerSlots {
    pub fn is_empty(&self) -> bool {
        self.bidirectional.is_none() && self.push.is_none()
    }
}

/// Shared registry of live peers. Cheap to clone; all clones see the same map.
///
/// Every operation locks a single shard for the duration of one
/// mutate-and-return or read-and-return, never across an await point.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<DashMap<PeerId, PeerSlots>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the WebSocket slot for `peer`. Last registration wins; the
    /// displaced handle, if any, is returned.
    pub fn register_bidirectional(
        &self,
        peer: PeerId,
        handle: BidirectionalHandle,
    ) -> Option<BidirectionalHandle> {
        let session = handle.session();
        let displaced = self.peers.entry(peer).or_default().bidirectional.replace(handle);
        tracing::debug!(
            peer_id = %peer,
            session_id = %session,
            replaced = displaced.is_some(),
            "WebSocket slot registered"
        );
        displaced
    }

    /// Install the push slot for `peer`. Same overwrite semantics as
    /// [`register_bidirectional`](Self::register_bidirectional).
    pub fn register_push(&self, peer: PeerId, handle: PushHandle) -> Option<PushHandle> {
        let session = handle.session();
        let displaced = self.peers.entry(peer).or_default().push.replace(handle);
        tracing::debug!(
            peer_id = %peer,
            session_id = %session,
            replaced = displaced.is_some(),
            "Push slot registered"
        );
        displaced
    }

    /// Clear `peer`'s WebSocket slot if `session` still owns it.
    /// Returns whether a slot was cleared; calling it twice is harmless.
    pub fn unregister_bidirectional(&self, peer: PeerId, session: SessionId) -> bool {
        self.clear_slot(peer, |slots| {
            if slots.bidirectional.as_ref().map(|h| h.session) == Some(session) {
                slots.bidirectional = None;
                true
            } else {
                false
            }
        })
    }

    /// Clear `peer`'s push slot if `session` still owns it.
    pub fn unregister_push(&self, peer: PeerId, session: SessionId) -> bool {
        self.clear_slot(peer, |slots| {
            if slots.push.as_ref().map(|h| h.session) == Some(session) {
                slots.push = None;
                true
            } else {
                false
            }
        })
    }

    /// Apply `clear` to the entry and drop it once both slots are empty,
    /// all under the same shard lock.
    fn clear_slot(&self, peer: PeerId, clear: impl FnOnce(&mut PeerSlots) -> bool) -> bool {
        match self.peers.entry(peer) {
            Entry::Occupied(mut entry) => {
                let cleared = clear(entry.get_mut());
                if entry.get().is_empty() {
                    entry.remove();
                }
                cleared
            }
            Entry::Vacant(_) => false,
        }
    }

    pub fn lookup(&self, peer: &PeerId) -> PeerSlots {
        self.peers
            .get(peer)
            .map(|slots| slots.value().clone())
            .unwrap_or_default()
    }

    pub fn is_online(&self, peer: &PeerId) -> bool {
        self.peers
            .get(peer)
            .map(|slots| !slots.is_empty())
            .unwrap_or(false)
    }

    /// Number of peers with at least one live slot.
    pub fn online_count(&self) -> usize {
        self.peers.len()
    }
}
