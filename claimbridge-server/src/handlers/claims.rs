use axum::{
    extract::{Path, State},
    response::Json,
};
use claimbridge_model::{
    ClaimId, ClaimSubmission, HealthSnapshot, RoutingStrategy, SubmissionResult,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitClaimRequest {
    pub claim: ClaimSubmission,
    /// Falls back to the configured default strategy.
    #[serde(default)]
    pub strategy: Option<RoutingStrategy>,
}

/// Run a claim through validation, routing and submission.
///
/// Connector failures are part of the returned result; only claims that
/// never reach a connector come back as errors.
pub async fn submit_claim(
    State(state): State<AppState>,
    Json(request): Json<SubmitClaimRequest>,
) -> AppResult<Json<SubmissionResult>> {
    let SubmitClaimRequest { claim, strategy } = request;
    let strategy =
        strategy.unwrap_or(state.config().orchestrator.routing.default_strategy);
    info!(claim_id = %claim.claim_id, %strategy, "claim received");

    let result = state.service().submit_claim(claim, strategy).await?;
    Ok(Json(result))
}

pub async fn get_claim_status(
    State(state): State<AppState>,
    Path(claim_id): Path<String>,
) -> AppResult<Json<SubmissionResult>> {
    let claim_id = ClaimId::new(claim_id)
        .map_err(|err| AppError::bad_request(err.to_string()))?;
    let result = state.service().get_claim_status(&claim_id).await?;
    Ok(Json(result))
}

pub async fn connector_health(
    State(state): State<AppState>,
) -> Json<HealthSnapshot> {
    Json(state.service().health_snapshot())
}
