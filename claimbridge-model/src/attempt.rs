use std::fmt;

use chrono::{DateTime, Utc};

use crate::ids::{AttemptId, ClaimId, ConnectorId};

/// Coarse result of a single connector invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    BusinessRejection,
    AuthFailure,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::TransientFailure => "transient_failure",
            AttemptOutcome::BusinessRejection => "business_rejection",
            AttemptOutcome::AuthFailure => "auth_failure",
        })
    }
}

/// What a successful submission told us about the claim itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Disposition {
    Accepted,
    /// Accepted for processing; the final answer arrives via status checks.
    Queued,
    PartiallyApproved,
}

/// Classified failure cause recorded on an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FailureKind {
    Transient,
    Timeout,
    Authentication,
    BusinessRejection,
    CircuitOpen,
    MalformedResponse,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Transient => "transient",
            FailureKind::Timeout => "timeout",
            FailureKind::Authentication => "authentication",
            FailureKind::BusinessRejection => "business_rejection",
            FailureKind::CircuitOpen => "circuit_open",
            FailureKind::MalformedResponse => "malformed_response",
        })
    }
}

/// Coded decline reason as returned by the payer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RejectionReason {
    pub code: String,
    pub message: String,
}

impl RejectionReason {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttemptFailure {
    pub kind: FailureKind,
    pub message: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub reasons: Vec<RejectionReason>,
}

/// One connector invocation, appended to the claim's attempt log.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubmissionAttempt {
    pub attempt_id: AttemptId,
    pub claim_id: ClaimId,
    pub connector_id: ConnectorId,
    /// Position of the target in the plan.
    pub sequence: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub disposition: Option<Disposition>,
    /// Transaction reference or confirmation number issued by the target.
    pub reference: Option<String>,
    pub failure: Option<AttemptFailure>,
    /// Retries performed inside the resilience wrapper for this invocation.
    pub retry_count: u32,
}

impl SubmissionAttempt {
    pub fn latency_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0)
    }

    pub fn is_accepted(&self) -> bool {
        self.outcome == AttemptOutcome::Success
            && self.disposition == Some(Disposition::Accepted)
    }

    pub fn is_partially_approved(&self) -> bool {
        self.outcome == AttemptOutcome::Success
            && self.disposition == Some(Disposition::PartiallyApproved)
    }

    /// Submitted successfully but still awaiting a final answer.
    pub fn is_outstanding(&self) -> bool {
        self.outcome == AttemptOutcome::Success
            && self.disposition == Some(Disposition::Queued)
    }

    pub fn is_rejection(&self) -> bool {
        self.outcome == AttemptOutcome::BusinessRejection
    }

    /// Accepted, queued, partially approved or rejected: the target gave an
    /// answer that ends a sequential plan.
    pub fn is_definitive(&self) -> bool {
        matches!(
            self.outcome,
            AttemptOutcome::Success | AttemptOutcome::BusinessRejection
        )
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}
