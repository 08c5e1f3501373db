use std::time::Duration;

use claimbridge_model::{ClaimId, ModelError, ValidationReport};
use thiserror::Error;

/// Errors surfaced by the claim service to its callers.
///
/// Connector failures never appear here: they are classified at the
/// resilience boundary and folded into the `SubmissionResult`.
#[derive(Error, Debug)]
pub enum ClaimError {
    #[error("claim {} failed validation: {}", .0.claim_id, .0.error_messages().join("; "))]
    Validation(Box<ValidationReport>),

    #[error("claim not found: {0}")]
    NotFound(ClaimId),

    #[error("claim {0} is already being submitted")]
    Conflict(ClaimId),

    #[error("claim {claim_id} unresolved after {waited:?}; escalated to review")]
    TimeoutEscalation { claim_id: ClaimId, waited: Duration },

    #[error(transparent)]
    InvalidTransition(#[from] ModelError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClaimError {
    pub fn validation(report: ValidationReport) -> Self {
        ClaimError::Validation(Box::new(report))
    }

    pub fn report(&self) -> Option<&ValidationReport> {
        match self {
            ClaimError::Validation(report) => Some(report),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClaimError>;
