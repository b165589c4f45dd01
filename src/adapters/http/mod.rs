//! HTTP adapters - REST API implementations.
//!
//! `app_router` assembles the subscription routes with request tracing and
//! a per-request timeout.

pub mod subscription;

use std::time::Duration;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub use subscription::{subscription_router, ApiError, SubscriptionAppState};

/// Build the application router.
pub fn app_router(state: SubscriptionAppState, request_timeout: Duration) -> Router {
    // Outermost first
    let middleware = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::new(request_timeout));

    subscription_router().layer(middleware).with_state(state)
}
