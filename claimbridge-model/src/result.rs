use std::fmt;

use chrono::{DateTime, Utc};

use crate::attempt::{FailureKind, SubmissionAttempt};
use crate::error::ModelError;
use crate::ids::{AttemptId, ClaimId, ConnectorId};
use crate::plan::RoutingStrategy;

/// Claim-level status. See [`SubmissionStatus::is_terminal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SubmissionStatus {
    Accepted,
    Rejected,
    PartiallyApproved,
    Pending,
    Error,
    NeedsReview,
}

impl SubmissionStatus {
    /// Terminal statuses never change without a new claim submission.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::Accepted
                | SubmissionStatus::Rejected
                | SubmissionStatus::PartiallyApproved
                | SubmissionStatus::NeedsReview
        )
    }

    fn rank(&self) -> u8 {
        match self {
            SubmissionStatus::Pending => 0,
            SubmissionStatus::Error => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubmissionStatus::Accepted => "accepted",
            SubmissionStatus::Rejected => "rejected",
            SubmissionStatus::PartiallyApproved => "partially_approved",
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Error => "error",
            SubmissionStatus::NeedsReview => "needs_review",
        })
    }
}

/// Operator-facing explanation attached to `error` and `needs_review`
/// results.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Diagnostic {
    pub connector_id: Option<ConnectorId>,
    pub kind: Option<FailureKind>,
    pub message: String,
}

/// The single authoritative outcome for one claim.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubmissionResult {
    pub claim_id: ClaimId,
    pub strategy: RoutingStrategy,
    pub status: SubmissionStatus,
    pub authoritative_attempt: Option<AttemptId>,
    /// Every attempt considered, in completion order.
    pub attempts: Vec<SubmissionAttempt>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub diagnostics: Vec<Diagnostic>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubmissionResult {
    pub fn new(
        claim_id: ClaimId,
        strategy: RoutingStrategy,
        status: SubmissionStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            claim_id,
            strategy,
            status,
            authoritative_attempt: None,
            attempts: Vec::new(),
            diagnostics: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn authoritative(&self) -> Option<&SubmissionAttempt> {
        let id = self.authoritative_attempt?;
        self.attempts.iter().find(|a| a.attempt_id == id)
    }

    /// Attempts that were queued by their target and still need polling.
    pub fn outstanding(&self) -> impl Iterator<Item = &SubmissionAttempt> {
        self.attempts.iter().filter(|a| a.is_outstanding())
    }

    /// Move to `next`, refusing any transition that is not strictly toward a
    /// terminal state.
    pub fn transition(
        &mut self,
        next: SubmissionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), ModelError> {
        if self.status.is_terminal() || next.rank() <= self.status.rank() {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Per-attempt failure reasons, used to build diagnostics.
    pub fn failure_diagnostics(&self) -> Vec<Diagnostic> {
        self.attempts
            .iter()
            .filter_map(|attempt| {
                attempt.failure.as_ref().map(|failure| Diagnostic {
                    connector_id: Some(attempt.connector_id.clone()),
                    kind: Some(failure.kind),
                    message: failure.message.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: SubmissionStatus) -> SubmissionResult {
        SubmissionResult::new(
            "CLM-1".into(),
            RoutingStrategy::PrimaryFirst,
            status,
            Utc::now(),
        )
    }

    #[test]
    fn pending_moves_to_terminal() {
        let mut r = result(SubmissionStatus::Pending);
        r.transition(SubmissionStatus::Accepted, Utc::now()).unwrap();
        assert_eq!(r.status, SubmissionStatus::Accepted);
    }

    #[test]
    fn terminal_never_reverts_to_pending() {
        let mut r = result(SubmissionStatus::Rejected);
        let err = r
            .transition(SubmissionStatus::Pending, Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::InvalidTransition {
                from: SubmissionStatus::Rejected,
                to: SubmissionStatus::Pending,
            }
        );
        assert!(r.transition(SubmissionStatus::Accepted, Utc::now()).is_err());
    }

    #[test]
    fn error_can_escalate_but_not_return_to_pending() {
        let mut r = result(SubmissionStatus::Error);
        assert!(r.transition(SubmissionStatus::Pending, Utc::now()).is_err());
        r.transition(SubmissionStatus::NeedsReview, Utc::now()).unwrap();
        assert!(r.is_terminal());
    }
}
