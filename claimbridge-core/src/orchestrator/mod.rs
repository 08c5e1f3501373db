//! Plan execution.
//!
//! Sequential plans invoke one target at a time and stop at the first
//! definitive answer. Parallel plans fan out to every target under a global
//! deadline; calls still running at the deadline are dropped and recorded as
//! timeouts. Each attempt is committed to the store as soon as it completes.

pub mod aggregate;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use claimbridge_model::{
    AttemptFailure, AttemptId, AttemptOutcome, ClaimSubmission, ConnectorId,
    Diagnostic, FailureKind, PlanMode, SubmissionAttempt, SubmissionPlan,
    SubmissionResult, SubmissionStatus, ValidationReport,
};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::connectors::SubmissionReceipt;
use crate::error::Result;
use crate::ports::{ClaimStore, ReviewQueue, ReviewReason, ReviewTicket};
use crate::resilience::{CallReport, ConnectorRegistry};
use crate::routing::PayerStats;

pub use aggregate::{Aggregate, aggregate};

pub struct SubmissionOrchestrator {
    registry: Arc<ConnectorRegistry>,
    store: Arc<dyn ClaimStore>,
    review: Arc<dyn ReviewQueue>,
    stats: Arc<PayerStats>,
    parallel_timeout: Duration,
}

impl fmt::Debug for SubmissionOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionOrchestrator")
            .field("connectors", &self.registry.len())
            .field("parallel_timeout", &self.parallel_timeout)
            .finish()
    }
}

/// Turn a wrapped call into the attempt record the log keeps.
pub fn attempt_from_report(
    claim: &ClaimSubmission,
    connector_id: &ConnectorId,
    sequence: u32,
    report: CallReport<SubmissionReceipt>,
) -> SubmissionAttempt {
    let (outcome, disposition, reference, failure) = match report.result {
        Ok(receipt) => (
            AttemptOutcome::Success,
            Some(receipt.disposition),
            Some(receipt.reference),
            None,
        ),
        Err(err) => (err.outcome(), None, None, Some(err.to_failure())),
    };
    SubmissionAttempt {
        attempt_id: AttemptId::new(),
        claim_id: claim.claim_id.clone(),
        connector_id: connector_id.clone(),
        sequence,
        started_at: report.started_at,
        finished_at: report.finished_at,
        outcome,
        disposition,
        reference,
        failure,
        retry_count: report.retries,
    }
}

fn synthetic_failure(
    claim: &ClaimSubmission,
    connector_id: &ConnectorId,
    sequence: u32,
    started_at: DateTime<Utc>,
    kind: FailureKind,
    message: String,
) -> SubmissionAttempt {
    SubmissionAttempt {
        attempt_id: AttemptId::new(),
        claim_id: claim.claim_id.clone(),
        connector_id: connector_id.clone(),
        sequence,
        started_at,
        finished_at: Utc::now(),
        outcome: AttemptOutcome::TransientFailure,
        disposition: None,
        reference: None,
        failure: Some(AttemptFailure {
            kind,
            message,
            reasons: Vec::new(),
        }),
        retry_count: 0,
    }
}

impl SubmissionOrchestrator {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        store: Arc<dyn ClaimStore>,
        review: Arc<dyn ReviewQueue>,
        stats: Arc<PayerStats>,
        parallel_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            review,
            stats,
            parallel_timeout,
        }
    }

    /// Run `plan` for `claim` and fold every attempt into one result.
    ///
    /// Connector failures never surface as `Err`; only store and review
    /// queue failures do.
    pub async fn execute(
        &self,
        claim: &ClaimSubmission,
        plan: &SubmissionPlan,
        report: &ValidationReport,
    ) -> Result<SubmissionResult> {
        let span = info_span!(
            "claim_execution",
            claim_id = %claim.claim_id,
            strategy = %plan.strategy,
            mode = ?plan.mode,
            targets = plan.targets.len(),
        );
        async move {
            let started_at = Utc::now();
            if plan.is_needs_review() {
                return self.hold_for_review(claim, plan, report, started_at).await;
            }

            let attempts = match plan.mode {
                PlanMode::Sequential => self.run_sequential(claim, plan).await?,
                PlanMode::Parallel => self.run_parallel(claim, plan).await?,
                PlanMode::NeedsReview => Vec::new(),
            };

            let Aggregate {
                status,
                authoritative,
                diagnostics,
                needs_reconciliation,
            } = aggregate(&attempts, &plan.skipped, plan.mode);

            let mut result = SubmissionResult::new(
                claim.claim_id.clone(),
                plan.strategy,
                status,
                started_at,
            );
            result.authoritative_attempt = authoritative;
            result.attempts = attempts;
            result.diagnostics = diagnostics;
            result.updated_at = Utc::now();

            if result.attempts.is_empty() {
                result.diagnostics.push(Diagnostic {
                    connector_id: None,
                    kind: None,
                    message: "no eligible connector for this claim".to_string(),
                });
                self.review
                    .enqueue(ReviewTicket::new(
                        claim.claim_id.clone(),
                        ReviewReason::NoEligibleConnector,
                        result.diagnostics.clone(),
                    ))
                    .await?;
            } else if needs_reconciliation {
                self.review
                    .enqueue(ReviewTicket::new(
                        claim.claim_id.clone(),
                        ReviewReason::ManualReconciliation,
                        result.diagnostics.clone(),
                    ))
                    .await?;
            }

            info!(
                target: "claims::orchestrator",
                status = %result.status,
                attempts = result.attempts.len(),
                "claim executed"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }

    async fn hold_for_review(
        &self,
        claim: &ClaimSubmission,
        plan: &SubmissionPlan,
        report: &ValidationReport,
        now: DateTime<Utc>,
    ) -> Result<SubmissionResult> {
        let mut result = SubmissionResult::new(
            claim.claim_id.clone(),
            plan.strategy,
            SubmissionStatus::NeedsReview,
            now,
        );
        result.diagnostics.push(Diagnostic {
            connector_id: None,
            kind: None,
            message: format!(
                "risk score {} reached the review threshold",
                report.risk_score
            ),
        });
        result
            .diagnostics
            .extend(report.risk_factors.iter().map(|factor| Diagnostic {
                connector_id: None,
                kind: None,
                message: format!("{} (+{}): {}", factor.rule, factor.weight, factor.detail),
            }));
        self.review
            .enqueue(ReviewTicket::new(
                claim.claim_id.clone(),
                ReviewReason::HighRisk,
                result.diagnostics.clone(),
            ))
            .await?;
        Ok(result)
    }

    async fn commit(
        &self,
        claim: &ClaimSubmission,
        attempt: &SubmissionAttempt,
    ) -> Result<()> {
        debug!(
            target: "claims::orchestrator",
            connector = %attempt.connector_id,
            sequence = attempt.sequence,
            outcome = %attempt.outcome,
            retries = attempt.retry_count,
            "attempt finished"
        );
        self.store.append_attempt(attempt).await?;
        self.stats.record(&claim.payer_id, attempt);
        Ok(())
    }

    async fn run_sequential(
        &self,
        claim: &ClaimSubmission,
        plan: &SubmissionPlan,
    ) -> Result<Vec<SubmissionAttempt>> {
        let mut attempts = Vec::with_capacity(plan.targets.len());
        for (sequence, id) in plan.targets.iter().enumerate() {
            let sequence = sequence as u32;
            let Some(connector) = self.registry.get(id) else {
                warn!(target: "claims::orchestrator", connector = %id, "plan names an unknown connector");
                continue;
            };
            let report = connector.submit(claim).await;
            let attempt = attempt_from_report(claim, id, sequence, report);
            self.commit(claim, &attempt).await?;
            let definitive = attempt.is_definitive();
            attempts.push(attempt);
            if definitive {
                break;
            }
        }
        Ok(attempts)
    }

    async fn run_parallel(
        &self,
        claim: &ClaimSubmission,
        plan: &SubmissionPlan,
    ) -> Result<Vec<SubmissionAttempt>> {
        let started_at = Utc::now();
        let mut outstanding: BTreeMap<u32, ConnectorId> = BTreeMap::new();
        let mut tasks = JoinSet::new();

        for (sequence, id) in plan.targets.iter().enumerate() {
            let sequence = sequence as u32;
            let Some(connector) = self.registry.get(id) else {
                warn!(target: "claims::orchestrator", connector = %id, "plan names an unknown connector");
                continue;
            };
            outstanding.insert(sequence, id.clone());
            let claim = claim.clone();
            tasks.spawn(
                async move {
                    let report = connector.submit(&claim).await;
                    (sequence, report)
                }
                .in_current_span(),
            );
        }

        let mut attempts = Vec::with_capacity(outstanding.len());
        let deadline = tokio::time::sleep(self.parallel_timeout);
        tokio::pin!(deadline);
        let mut timed_out = false;

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((sequence, report))) => {
                        let Some(id) = outstanding.remove(&sequence) else {
                            continue;
                        };
                        let attempt = attempt_from_report(claim, &id, sequence, report);
                        self.commit(claim, &attempt).await?;
                        attempts.push(attempt);
                    }
                    Some(Err(err)) => {
                        warn!(target: "claims::orchestrator", error = %err, "submission task failed");
                    }
                },
                _ = &mut deadline => {
                    timed_out = true;
                    tasks.abort_all();
                    break;
                }
            }
        }

        for (sequence, id) in outstanding {
            let (kind, message) = if timed_out {
                (
                    FailureKind::Timeout,
                    format!(
                        "no answer within the {} ms fan-out deadline",
                        self.parallel_timeout.as_millis()
                    ),
                )
            } else {
                (
                    FailureKind::Transient,
                    "submission task ended without an outcome".to_string(),
                )
            };
            let attempt =
                synthetic_failure(claim, &id, sequence, started_at, kind, message);
            self.commit(claim, &attempt).await?;
            attempts.push(attempt);
        }
        if timed_out {
            debug!(target: "claims::orchestrator", "fan-out deadline reached; remaining calls cancelled");
        }
        Ok(attempts)
    }
}
