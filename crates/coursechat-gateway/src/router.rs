use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::api;
use crate::state::SharedState;

/// Build the application router.
pub fn build_router(state: SharedState) -> Router {
    let rate_limit = state.config.gateway.rate_limit.clone();

    let router = Router::new()
        .route("/health", get(api::health))
        .route("/api/status", get(api::status))
        .route("/api/chat", post(api::chat))
        .route("/api/chat/{request_id}/cancel", post(api::cancel_turn))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    if !rate_limit.enabled {
        return router;
    }

    // Per-IP rate limit. Requires serving with connect info.
    let Some(governor_conf) = GovernorConfigBuilder::default()
        .per_second(rate_limit.per_second)
        .burst_size(rate_limit.burst_size)
        .finish()
    else {
        warn!(
            per_second = rate_limit.per_second,
            burst_size = rate_limit.burst_size,
            "invalid rate limit settings, serving without a rate limit"
        );
        return router;
    };
    let governor_limiter = governor_conf.limiter().clone();

    // Forget idle IPs so limiter state stays bounded.
    tokio::spawn(async move {
        let interval = Duration::from_secs(60);
        loop {
            tokio::time::sleep(interval).await;
            governor_limiter.retain_recent();
        }
    });

    router.layer(GovernorLayer::new(governor_conf))
}
