//! Background resolution of pending results.
//!
//! Each pending claim gets one task that sleeps through the schedule and
//! asks every still-queued target for its status. The stored result is the
//! source of truth; a task stops as soon as the stored result is no longer
//! pending.

pub mod schedule;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use claimbridge_model::{
    AttemptId, ClaimId, Diagnostic, FailureKind, SubmissionResult,
    SubmissionStatus, TargetStatus,
};
use dashmap::DashSet;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::{ClaimError, Result};
use crate::ports::{ClaimStore, ReviewQueue, ReviewReason, ReviewTicket};
use crate::resilience::ConnectorRegistry;

pub use schedule::PollSchedule;

/// Claim-level status a target's final answer maps to. `None` while the
/// target is still working.
pub fn resolved_status(status: TargetStatus) -> Option<SubmissionStatus> {
    match status {
        TargetStatus::Queued => None,
        TargetStatus::Complete => Some(SubmissionStatus::Accepted),
        TargetStatus::Partial => Some(SubmissionStatus::PartiallyApproved),
        TargetStatus::Error => Some(SubmissionStatus::Rejected),
    }
}

/// What one round of status checks concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// At least one target is still working.
    Waiting,
    /// The claim reached `status`, settled by `attempt`.
    Resolved {
        status: SubmissionStatus,
        attempt: AttemptId,
    },
    /// The stored result is no longer pending.
    Settled,
}

pub struct StatusPoller {
    registry: Arc<ConnectorRegistry>,
    store: Arc<dyn ClaimStore>,
    review: Arc<dyn ReviewQueue>,
    schedule: PollSchedule,
    shutdown: CancellationToken,
    active: DashSet<ClaimId>,
}

impl fmt::Debug for StatusPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusPoller")
            .field("schedule", &self.schedule)
            .field("active", &self.active.len())
            .field("cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl StatusPoller {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        store: Arc<dyn ClaimStore>,
        review: Arc<dyn ReviewQueue>,
        schedule: PollSchedule,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            store,
            review,
            schedule,
            shutdown,
            active: DashSet::new(),
        }
    }

    /// Start polling `result` if it is pending and not already tracked.
    pub fn track(self: &Arc<Self>, result: &SubmissionResult) -> bool {
        if result.status != SubmissionStatus::Pending
            || self.shutdown.is_cancelled()
            || !self.active.insert(result.claim_id.clone())
        {
            return false;
        }
        let claim_id = result.claim_id.clone();
        let span = info_span!("claim_polling", claim_id = %claim_id);
        let poller = Arc::clone(self);
        tokio::spawn(
            async move {
                if let Err(err) = poller.run(&claim_id).await {
                    warn!(target: "claims::poller", error = %err, "polling stopped on error");
                }
                poller.active.remove(&claim_id);
            }
            .instrument(span),
        );
        true
    }

    /// Claims currently being polled.
    pub fn active(&self) -> usize {
        self.active.len()
    }

    async fn run(&self, claim_id: &ClaimId) -> Result<()> {
        let mut waited = Duration::ZERO;
        let mut finished: HashSet<AttemptId> = HashSet::new();

        for delay in self.schedule.delays() {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!(target: "claims::poller", "shutdown; polling abandoned");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
            waited += delay;

            match self.poll_once(claim_id, &mut finished).await? {
                PollOutcome::Waiting => continue,
                PollOutcome::Resolved { status, .. } => {
                    info!(target: "claims::poller", %status, ?waited, "pending claim resolved");
                    return Ok(());
                }
                PollOutcome::Settled => return Ok(()),
            }
        }

        self.escalate(claim_id, waited).await
    }

    /// Ask every outstanding target once and apply any final answer.
    ///
    /// `finished` collects attempts whose target already answered with a
    /// rejection, so they are not asked again.
    pub async fn poll_once(
        &self,
        claim_id: &ClaimId,
        finished: &mut HashSet<AttemptId>,
    ) -> Result<PollOutcome> {
        let Some(mut result) = self.store.result(claim_id).await? else {
            return Err(ClaimError::NotFound(claim_id.clone()));
        };
        if result.status != SubmissionStatus::Pending {
            return Ok(PollOutcome::Settled);
        }

        let mut outstanding: Vec<_> = result.outstanding().cloned().collect();
        outstanding.sort_by_key(|a| a.sequence);

        let checks = outstanding
            .iter()
            .filter(|a| !finished.contains(&a.attempt_id))
            .filter_map(|attempt| {
                let reference = attempt.reference.as_deref()?;
                let Some(connector) = self.registry.get(&attempt.connector_id) else {
                    warn!(target: "claims::poller", connector = %attempt.connector_id, "connector no longer registered");
                    return None;
                };
                Some(async move {
                    (attempt, reference, connector.check_status(reference).await)
                })
            });
        let reports = join_all(checks).await;

        let mut still_waiting = false;
        let mut answers: Vec<(SubmissionStatus, AttemptId)> = Vec::new();
        for (attempt, reference, report) in reports {
            match report.result {
                Ok(status) => match resolved_status(status) {
                    Some(next) => {
                        debug!(
                            target: "claims::poller",
                            connector = %attempt.connector_id,
                            reference,
                            %next,
                            "target answered"
                        );
                        if next == SubmissionStatus::Rejected {
                            finished.insert(attempt.attempt_id);
                        }
                        answers.push((next, attempt.attempt_id));
                    }
                    None => still_waiting = true,
                },
                Err(err) => {
                    debug!(
                        target: "claims::poller",
                        connector = %attempt.connector_id,
                        error = %err,
                        "status check failed; will retry on schedule"
                    );
                    still_waiting = true;
                }
            }
        }
        // Same precedence as aggregation: any acceptance settles the claim,
        // a rejection only once no target is left working. `join_all` keeps
        // plan order, so the first match is the lowest sequence. Rejections
        // from earlier rounds count too, so the lowest rejected sequence is
        // authoritative whichever round it answered in.
        let pick = |wanted: SubmissionStatus| {
            answers.iter().find(|(status, _)| *status == wanted).copied()
        };
        let decision = pick(SubmissionStatus::Accepted)
            .or_else(|| pick(SubmissionStatus::PartiallyApproved))
            .or_else(|| {
                let all_rejected = !still_waiting
                    && !outstanding.is_empty()
                    && outstanding
                        .iter()
                        .all(|a| finished.contains(&a.attempt_id));
                all_rejected
                    .then(|| outstanding.first())
                    .flatten()
                    .map(|a| (SubmissionStatus::Rejected, a.attempt_id))
            });

        let Some((status, attempt)) = decision else {
            return Ok(PollOutcome::Waiting);
        };
        result.transition(status, Utc::now())?;
        result.authoritative_attempt = Some(attempt);
        self.store.put_result(&result).await?;
        Ok(PollOutcome::Resolved { status, attempt })
    }

    async fn escalate(&self, claim_id: &ClaimId, waited: Duration) -> Result<()> {
        let Some(mut result) = self.store.result(claim_id).await? else {
            return Err(ClaimError::NotFound(claim_id.clone()));
        };
        if result.status != SubmissionStatus::Pending {
            return Ok(());
        }
        let escalation = ClaimError::TimeoutEscalation {
            claim_id: claim_id.clone(),
            waited,
        };
        warn!(target: "claims::poller", error = %escalation, "pending claim escalated");

        result.transition(SubmissionStatus::NeedsReview, Utc::now())?;
        let unresolved: Vec<Diagnostic> = result
            .outstanding()
            .map(|attempt| Diagnostic {
                connector_id: Some(attempt.connector_id.clone()),
                kind: Some(FailureKind::Timeout),
                message: escalation.to_string(),
            })
            .collect();
        result.diagnostics.extend(unresolved);
        self.store.put_result(&result).await?;
        self.review
            .enqueue(ReviewTicket::new(
                claim_id.clone(),
                ReviewReason::PollingTimeout,
                result.diagnostics.clone(),
            ))
            .await
    }
}
