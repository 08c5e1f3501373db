//! HTTP front end for the claimbridge submission engine.
//!
//! Exposes claim submission and status reads over axum, loads
//! configuration from `claimbridge.toml` and the environment, and wires the
//! configured connectors into a [`claimbridge_core::ClaimService`].

pub mod handlers;
pub mod infra;
pub mod routes;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

pub use infra::app_state::AppState;

/// Full application router with state applied.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(handlers::health::ping_handler))
        .route("/health", get(handlers::health::health_handler))
        .merge(routes::create_api_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
