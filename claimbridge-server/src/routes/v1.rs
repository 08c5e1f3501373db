use axum::{
    Router,
    routing::{get, post},
};

use crate::{AppState, handlers::claims};

pub mod paths {
    pub const CLAIMS: &str = "/claims";
    pub const CLAIM: &str = "/claims/{claim_id}";
    pub const CONNECTOR_HEALTH: &str = "/connectors/health";
}

/// Create all v1 API routes
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route(paths::CLAIMS, post(claims::submit_claim))
        .route(paths::CLAIM, get(claims::get_claim_status))
        .route(paths::CONNECTOR_HEALTH, get(claims::connector_health))
}
