use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::SessionConfig;
use crate::registry::PeerRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Live delivery slots per peer
    pub registry: PeerRegistry,
    /// Keep-alive timing for sessions
    pub session: SessionConfig,
    /// Flipped to true once the server starts shutting down
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(registry: PeerRegistry, session: SessionConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            session,
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.session.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.session.pong_timeout_secs)
    }

    pub fn sse_keep_alive(&self) -> Duration {
        Duration::from_secs(self.session.sse_keep_alive_secs)
    }

    /// Ask every open WebSocket session and push stream to finish, so that
    /// graceful shutdown is not held up by long-lived connections.
    pub fn trigger_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// Resolve once shutdown has been triggered (or the state is gone).
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // The borrowed value is dropped here so callers' futures stay Send.
    let _ = shutdown.wait_for(|stopping| *stopping).await;
}
