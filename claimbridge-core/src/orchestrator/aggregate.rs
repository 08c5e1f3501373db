//! Folding attempts into one claim-level outcome.
//!
//! Precedence: accepted, then partially approved, then pending, then
//! rejected, then error. Within a class the attempt with the lowest plan
//! sequence is authoritative, so the result depends only on the set of
//! completed attempts and never on completion order.
//!
//! A sequential plan stops at its first rejection, so that rejection is the
//! answer. A parallel plan is `rejected` only when every target rejected;
//! rejections next to plumbing failures leave the claim in `error` for an
//! operator to reconcile.

use claimbridge_model::{
    AttemptId, Diagnostic, FailureKind, PlanMode, SkippedTarget,
    SubmissionAttempt, SubmissionStatus,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub status: SubmissionStatus,
    pub authoritative: Option<AttemptId>,
    pub diagnostics: Vec<Diagnostic>,
    /// Targets gave conflicting definitive answers.
    pub needs_reconciliation: bool,
}

fn first_by_sequence<'a>(
    attempts: &'a [SubmissionAttempt],
    pred: impl Fn(&SubmissionAttempt) -> bool,
) -> Option<&'a SubmissionAttempt> {
    attempts
        .iter()
        .filter(|a| pred(*a))
        .min_by_key(|a| a.sequence)
}

pub fn diagnostics(
    attempts: &[SubmissionAttempt],
    skipped: &[SkippedTarget],
) -> Vec<Diagnostic> {
    let mut ordered: Vec<&SubmissionAttempt> = attempts.iter().collect();
    ordered.sort_by_key(|a| a.sequence);
    let mut out: Vec<Diagnostic> = ordered
        .into_iter()
        .filter_map(|attempt| {
            attempt.failure.as_ref().map(|failure| Diagnostic {
                connector_id: Some(attempt.connector_id.clone()),
                kind: Some(failure.kind),
                message: failure.message.clone(),
            })
        })
        .collect();
    out.extend(skipped.iter().map(|s| Diagnostic {
        connector_id: Some(s.connector_id.clone()),
        kind: Some(FailureKind::CircuitOpen),
        message: format!("skipped: {}", s.reason),
    }));
    out
}

pub fn aggregate(
    attempts: &[SubmissionAttempt],
    skipped: &[SkippedTarget],
    mode: PlanMode,
) -> Aggregate {
    let diagnostics = diagnostics(attempts, skipped);
    let has_rejection = attempts.iter().any(SubmissionAttempt::is_rejection);

    let decided: [(SubmissionStatus, fn(&SubmissionAttempt) -> bool); 3] = [
        (SubmissionStatus::Accepted, SubmissionAttempt::is_accepted),
        (
            SubmissionStatus::PartiallyApproved,
            SubmissionAttempt::is_partially_approved,
        ),
        (SubmissionStatus::Pending, SubmissionAttempt::is_outstanding),
    ];
    for (status, pred) in decided {
        if let Some(winner) = first_by_sequence(attempts, pred) {
            return Aggregate {
                status,
                authoritative: Some(winner.attempt_id),
                diagnostics,
                needs_reconciliation: has_rejection,
            };
        }
    }

    // No target took the claim.
    if let Some(rejection) =
        first_by_sequence(attempts, SubmissionAttempt::is_rejection)
    {
        let unanswered = attempts.iter().any(|a| !a.is_rejection());
        if mode == PlanMode::Parallel && unanswered {
            return Aggregate {
                status: SubmissionStatus::Error,
                authoritative: None,
                diagnostics,
                needs_reconciliation: true,
            };
        }
        return Aggregate {
            status: SubmissionStatus::Rejected,
            authoritative: Some(rejection.attempt_id),
            diagnostics,
            needs_reconciliation: false,
        };
    }

    Aggregate {
        status: SubmissionStatus::Error,
        authoritative: None,
        diagnostics,
        needs_reconciliation: false,
    }
}
