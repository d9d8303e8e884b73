use axum::{
    extract::{Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures_util::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::{mpsc, watch};

use crate::error::RelayError;
use crate::events::PeerEvent;
use crate::identity::parse_peer_id;
use crate::push::subscription::PushSubscription;
use crate::state::{shutdown_requested, AppState};

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    pub uuid: Option<String>,
}

/// GET /sse?uuid=<peer>
/// Registers a push slot for the peer and streams its messages as SSE
/// `data:` events, starting with a `connected` event.
pub async fn subscribe(
    State(state): State<AppState>,
    Query(params): Query<SubscribeQuery>,
) -> Response {
    let uuid = match params.uuid.filter(|u| !u.is_empty()) {
        Some(uuid) => uuid,
        None => return RelayError::MissingField(&["UUID parameter"]).into_response(),
    };
    let peer = match parse_peer_id(&uuid) {
        Ok(peer) => peer,
        Err(err) => return err.into_response(),
    };

    let (subscription, rx) = PushSubscription::register(state.registry.clone(), peer);
    let shutdown = state.subscribe_shutdown();
    let sse = Sse::new(event_stream(subscription, rx, shutdown))
        .keep_alive(KeepAlive::default().interval(state.sse_keep_alive()));

    ([("x-accel-buffering", "no")], sse).into_response()
}

/// Drain the subscriber's queue into SSE events.
///
/// The stream owns the subscription, so the push slot is released as soon as
/// axum drops the stream, including while it is parked waiting for the next
/// item. It ends on its own once the queue's sender is dropped, which
/// happens when a newer subscription for the same peer replaces this one,
/// or when the server shuts down.
fn event_stream(
    subscription: PushSubscription,
    mut rx: mpsc::UnboundedReceiver<PeerEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let subscription = subscription;
        yield Ok(to_sse(&PeerEvent::Connected { uuid: subscription.peer() }));

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            yield Ok(to_sse(&event));
                        }
                        None => {
                            tracing::debug!(peer_id = %subscription.peer(), "Push queue closed");
                            break;
                        }
                    }
                }
                _ = shutdown_requested(&mut shutdown) => {
                    tracing::debug!(
                        peer_id = %subscription.peer(),
                        "Push stream ending for shutdown"
                    );
                    break;
                }
            }
        }
    }
}

fn to_sse(event: &PeerEvent) -> Event {
    Event::default().data(event.to_json())
}
