use std::time::Duration;

use claimbridge_model::{
    AttemptFailure, AttemptOutcome, ConnectorId, FailureKind, RejectionReason,
};
use reqwest::StatusCode;
use thiserror::Error;

/// Classified failure of a single connector call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Timeout, 5xx, connection reset. Retryable.
    #[error("transient connector failure: {message}")]
    Transient { message: String, timed_out: bool },

    /// Session or certificate rejected. Triggers one re-authentication.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Structured decline from the payer. Terminal for this connector.
    #[error("business rejection: {}", summarize(.reasons))]
    BusinessRejection { reasons: Vec<RejectionReason> },

    /// Response could not be parsed or lacked a required token.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Synthetic failure raised by an open breaker; no network call was made.
    #[error("circuit open for {connector}; retry after {retry_after:?}")]
    CircuitOpen {
        connector: ConnectorId,
        retry_after: Duration,
    },
}

fn summarize(reasons: &[RejectionReason]) -> String {
    if reasons.is_empty() {
        return "no reason given".to_string();
    }
    reasons
        .iter()
        .map(|r| format!("{}: {}", r.code, r.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConnectorError {
    pub fn transient(message: impl Into<String>) -> Self {
        ConnectorError::Transient {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        ConnectorError::Transient {
            message: message.into(),
            timed_out: true,
        }
    }

    pub fn rejection(reasons: Vec<RejectionReason>) -> Self {
        ConnectorError::BusinessRejection { reasons }
    }

    /// Map a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: StatusCode, context: &str) -> Self {
        let message = format!("{context}: HTTP {status}");
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
        {
            ConnectorError::Authentication(message)
        } else if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            ConnectorError::transient(message)
        } else {
            ConnectorError::MalformedResponse(message)
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ConnectorError::Transient {
                timed_out: true, ..
            } => FailureKind::Timeout,
            ConnectorError::Transient { .. } => FailureKind::Transient,
            ConnectorError::Authentication(_) => FailureKind::Authentication,
            ConnectorError::BusinessRejection { .. } => {
                FailureKind::BusinessRejection
            }
            ConnectorError::MalformedResponse(_) => {
                FailureKind::MalformedResponse
            }
            ConnectorError::CircuitOpen { .. } => FailureKind::CircuitOpen,
        }
    }

    /// Attempt outcome recorded once the wrapper has given up on the call.
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            ConnectorError::BusinessRejection { .. } => {
                AttemptOutcome::BusinessRejection
            }
            ConnectorError::Authentication(_) => AttemptOutcome::AuthFailure,
            _ => AttemptOutcome::TransientFailure,
        }
    }

    /// Whether the failure says something about connector health.
    pub fn counts_against_health(&self) -> bool {
        !matches!(
            self,
            ConnectorError::BusinessRejection { .. }
                | ConnectorError::CircuitOpen { .. }
        )
    }

    pub fn to_failure(&self) -> AttemptFailure {
        let reasons = match self {
            ConnectorError::BusinessRejection { reasons } => reasons.clone(),
            _ => Vec::new(),
        };
        AttemptFailure {
            kind: self.kind(),
            message: self.to_string(),
            reasons,
        }
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ConnectorError::timeout(err.to_string());
        }
        if let Some(status) = err.status() {
            return ConnectorError::from_status(status, "request failed");
        }
        if err.is_decode() {
            return ConnectorError::MalformedResponse(err.to_string());
        }
        // Connect, request body and redirect failures are network-level.
        ConnectorError::transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_onto_taxonomy() {
        assert_eq!(
            ConnectorError::from_status(StatusCode::UNAUTHORIZED, "x").kind(),
            FailureKind::Authentication
        );
        assert_eq!(
            ConnectorError::from_status(StatusCode::BAD_GATEWAY, "x").kind(),
            FailureKind::Transient
        );
        assert_eq!(
            ConnectorError::from_status(StatusCode::TOO_MANY_REQUESTS, "x")
                .kind(),
            FailureKind::Transient
        );
        assert_eq!(
            ConnectorError::from_status(StatusCode::NOT_FOUND, "x").kind(),
            FailureKind::MalformedResponse
        );
    }

    #[test]
    fn rejection_failure_keeps_coded_reasons() {
        let err = ConnectorError::rejection(vec![RejectionReason::new(
            "CO-16",
            "missing information",
        )]);
        let failure = err.to_failure();
        assert_eq!(failure.kind, FailureKind::BusinessRejection);
        assert_eq!(failure.reasons[0].code, "CO-16");
        assert!(failure.message.contains("CO-16: missing information"));
        assert!(!err.counts_against_health());
    }
}
