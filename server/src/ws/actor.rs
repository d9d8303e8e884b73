use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::registry::SessionId;
use crate::state::{shutdown_requested, AppState};
use crate::ws::protocol::Session;

/// Run the actor-per-connection pattern for one WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: feeds text frames to the [`Session`] state machine
///
/// The mpsc sender is what the registry hands to the delivery engine, so
/// replies and messages from other peers share one FIFO per connection.
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Dropping the session (on any exit from this function) releases its slot.
    let mut session = Session::new(state.registry.clone(), tx.clone());
    let session_id = session.id();

    tracing::info!(session_id = %session_id, "WebSocket actor started");

    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));
    let mut shutdown = state.subscribe_shutdown();
    let mut closing = false;

    // Track pong reception
    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();

    let ping_handle = tokio::spawn(keep_alive(
        tx.clone(),
        pong_rx,
        state.ping_interval(),
        state.pong_timeout(),
        session_id,
    ));

    loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            _ = &mut writer_handle => {
                // Sink is gone (send failure or our own close frame)
                tracing::debug!(session_id = %session_id, "WebSocket writer finished");
                break;
            }
            _ = shutdown_requested(&mut shutdown), if !closing => {
                // The writer exits after flushing the close frame
                closing = true;
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code: 1001,
                    reason: "Server shutting down".into(),
                })));
                continue;
            }
        };
        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    session.handle_text(text.as_str());
                }
                Message::Binary(_) => {
                    session.reject_binary();
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        session_id = %session_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(session_id = %session_id, "WebSocket stream ended");
                break;
            }
        }
    }

    writer_handle.abort();
    ping_handle.abort();
    session.close();

    tracing::info!(session_id = %session_id, "WebSocket actor stopped");
}

/// Ping the client every `ping_interval` and queue a close frame if no pong
/// arrives within `pong_timeout` of a ping.
async fn keep_alive(
    ping_tx: mpsc::UnboundedSender<Message>,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    ping_interval: Duration,
    pong_timeout: Duration,
    session_id: SessionId,
) {
    let mut ping_timer = interval(ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // Unsolicited pongs must not answer the ping about to be sent
        while pong_rx.try_recv().is_ok() {}

        if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            // Writer task has died, connection is gone
            break;
        }

        match timeout(pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!(session_id = %session_id, "Pong timeout, closing connection");
                let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                    code: 1001,
                    reason: "Pong timeout".into(),
                })));
                break;
            }
        }
    }
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(50);

    async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("keep-alive channel closed")
    }

    #[tokio::test]
    async fn test_pong_answers_ping() {
        let (ping_tx, mut frames) = mpsc::unbounded_channel();
        let (pong_tx, pong_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(keep_alive(
            ping_tx,
            pong_rx,
            TICK,
            TICK * 4,
            SessionId::next(),
        ));

        assert!(matches!(next_frame(&mut frames).await, Message::Ping(_)));
        pong_tx.send(()).unwrap();
        assert!(matches!(next_frame(&mut frames).await, Message::Ping(_)));

        handle.abort();
    }

    #[tokio::test]
    async fn test_early_pong_does_not_count_for_next_ping() {
        let (ping_tx, mut frames) = mpsc::unbounded_channel();
        let (pong_tx, pong_rx) = mpsc::unbounded_channel();

        // Client pong that arrives before any ping was sent
        pong_tx.send(()).unwrap();
        let handle = tokio::spawn(keep_alive(
            ping_tx,
            pong_rx,
            TICK,
            TICK * 2,
            SessionId::next(),
        ));

        assert!(matches!(next_frame(&mut frames).await, Message::Ping(_)));
        match next_frame(&mut frames).await {
            Message::Close(Some(frame)) => assert_eq!(frame.code, 1001),
            other => panic!("expected close frame, got {:?}", other),
        }

        handle.await.unwrap();
        drop(pong_tx);
    }
}
