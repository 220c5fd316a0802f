//! Web API router construction.

use axum::{Router, routing::get};
use std::time::Duration;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::web::{resources, status};

/// Cache-backed routes never wait on upstream, so this only guards against a stuck store.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Creates the web server router
pub fn create_router(app_state: AppState) -> Router {
    let cached = Router::new()
        .route("/health", get(status::health))
        .route("/resources/{kind}", get(resources::get_resource))
        .route(
            "/resources/{kind}/{param}",
            get(resources::get_resource_with_param),
        )
        .route("/matches/today", get(resources::todays_matches))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    // Direct calls may sit out an admission cool-down plus the coalescer's
    // retries; both are bounded by config, so no request timeout here.
    let direct = Router::new()
        .route("/direct/{kind}", get(resources::get_direct))
        .route(
            "/direct/{kind}/{param}",
            get(resources::get_direct_with_param),
        );

    let api_router = cached.merge(direct).with_state(app_state);

    Router::new().nest("/api", api_router).layer((
        TraceLayer::new_for_http(),
        CompressionLayer::new()
            .zstd(true)
            .br(true)
            .gzip(true)
            .quality(tower_http::CompressionLevel::Fastest),
    ))
}
