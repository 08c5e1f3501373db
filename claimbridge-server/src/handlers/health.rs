use axum::{extract::State, response::Json};
use serde_json::{Value, json};

use crate::infra::app_state::AppState;

pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let service = state.service();
    Json(json!({
        "status": "ok",
        "connectors": service.registry().len(),
        "polling": service.poller().active(),
    }))
}

pub async fn ping_handler() -> &'static str {
    "pong"
}
