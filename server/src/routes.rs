use axum::Router;
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::api::{health, send};
use crate::config::RateLimitConfig;
use crate::push::handler as push_handler;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes and middleware.
///
/// The rate limiter keys on the peer IP, so the router must be served with
/// `into_make_service_with_connect_info::<SocketAddr>()` when it is enabled.
pub fn build_router(state: AppState, rate_limit: &RateLimitConfig) -> Router {
    let mut send_routes = Router::new().route("/api/send", axum::routing::post(send::send_message));

    if rate_limit.enabled {
        let governor_config = GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(rate_limit.send_per_second)
            .burst_size(rate_limit.send_burst)
            .finish();

        match governor_config {
            Some(config) => {
                let config = Arc::new(config);
                let limiter = config.limiter().clone();

                // Periodically drop rate limiter state for idle clients
                tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                        limiter.retain_recent();
                    }
                });

                send_routes = send_routes.layer(GovernorLayer { config });
            }
            None => {
                tracing::warn!(
                    send_per_second = rate_limit.send_per_second,
                    send_burst = rate_limit.send_burst,
                    "Invalid rate limit settings, /api/send is not rate limited"
                );
            }
        }
    }

    // Bidirectional sessions
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Push subscriptions
    let push_routes = Router::new().route("/sse", axum::routing::get(push_handler::subscribe));

    let health = Router::new().route("/health", axum::routing::get(health::health_check));

    Router::new()
        .merge(send_routes)
        .merge(ws_routes)
        .merge(push_routes)
        .merge(health)
        .with_state(state)
}
