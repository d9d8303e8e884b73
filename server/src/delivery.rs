//! Delivery of a single message to every live slot of its recipient.

use crate::events::PeerEvent;
use crate::identity::PeerId;
use crate::registry::PeerRegistry;

/// A text message in flight. Lives only for one delivery attempt.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub from: PeerId,
    pub to: PeerId,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    /// At least one slot accepted the message.
    Delivered,
    /// No slot accepted it, either because none existed or all were stale.
    PeerOffline,
}

/// Hand `message` to each of the recipient's slots independently.
///
/// A failed write on one slot does not stop the other. Slots that refuse the
/// write belong to sessions that have already gone away; they are removed
/// here rather than left for the next lookup to trip over.
pub fn deliver(registry: &PeerRegistry, message: OutboundMessage) -> DeliveryResult {
    let OutboundMessage { from, to, text } = message;
    let slots = registry.lookup(&to);
    let event = PeerEvent::Message {
        from_uuid: from,
        text,
    };

    let mut delivered = false;

    if let Some(channel) = slots.bidirectional {
        if channel.send_event(&event) {
            delivered = true;
        } else {
            tracing::debug!(
                peer_id = %to,
                session_id = %channel.session(),
                "Dropping stale WebSocket slot after failed write"
            );
            registry.unregister_bidirectional(to, channel.session());
        }
    }

    if let Some(queue) = slots.push {
        if queue.enqueue(event) {
            delivered = true;
        } else {
            tracing::debug!(
                peer_id = %to,
                session_id = %queue.session(),
                "Dropping stale push slot after failed enqueue"
            );
            registry.unregister_push(to, queue.session());
        }
    }

    if delivered {
        tracing::debug!(from = %from, to = %to, "Message delivered");
        DeliveryResult::Delivered
    } else {
        tracing::debug!(from = %from, to = %to, "Recipient offline");
        DeliveryResult::PeerOffline
    }
}
