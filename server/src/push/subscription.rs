use tokio::sync::mpsc;

use crate::events::PeerEvent;
use crate::identity::PeerId;
use crate::registry::{PeerRegistry, PushHandle, SessionId};

/// A registered push slot, released when dropped.
///
/// The SSE stream owns this value, so the slot goes away whenever the stream
/// does: client disconnect, server shutdown, or the response being dropped
/// before it was ever polled.
pub struct PushSubscription {
    peer: PeerId,
    session: SessionId,
    registry: PeerRegistry,
}

impl PushSubscription {
    /// Create the subscriber's queue and install it as `peer`'s push slot.
    pub fn register(
        registry: PeerRegistry,
        peer: PeerId,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let session = SessionId::next();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register_push(peer, PushHandle::new(session, tx));
        tracing::info!(peer_id = %peer, session_id = %session, "Push subscriber connected");

        (
            Self {
                peer,
                session,
                registry,
            },
            rx,
        )
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        if self.registry.unregister_push(self.peer, self.session) {
            tracing::info!(
                peer_id = %self.peer,
                session_id = %self.session,
                "Push subscriber disconnected"
            );
        }
    }
}
