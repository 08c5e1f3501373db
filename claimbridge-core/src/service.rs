//! Inbound interface of the engine.
//!
//! `submit_claim` runs the whole pipeline: validation, eligibility lookup,
//! plan selection, execution and, for pending results, background polling.
//! `get_claim_status` is a plain read of the stored result.
//!
//! Once a claim is stored it always has a result: a `pending` placeholder is
//! written before any connector is called, and execution runs on its own
//! task so a caller that goes away cannot leave the claim without an
//! outcome.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use claimbridge_model::{
    ClaimId, ClaimSubmission, Diagnostic, EligibilityKey, HealthSnapshot,
    IssueCode, RoutingStrategy, SubmissionPlan, SubmissionResult,
    SubmissionStatus, ValidationIssue, ValidationReport,
};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::connectors::Connector;
use crate::eligibility::{EligibilityCache, EligibilityVerifier};
use crate::error::{ClaimError, Result};
use crate::orchestrator::{SubmissionOrchestrator, aggregate};
use crate::poller::{PollSchedule, StatusPoller};
use crate::ports::{
    ClaimStore, InMemoryClaimStore, InMemoryReviewQueue, ReviewQueue,
    ReviewReason, ReviewTicket,
};
use crate::resilience::ConnectorRegistry;
use crate::routing::{PayerStats, RoutingSelector};
use crate::validation::ValidationGate;
use crate::validation::history::{ClaimHistory, InMemoryClaimHistory};

pub struct ClaimService {
    config: OrchestratorConfig,
    gate: ValidationGate,
    eligibility: Option<EligibilityCache>,
    registry: Arc<ConnectorRegistry>,
    selector: RoutingSelector,
    orchestrator: Arc<SubmissionOrchestrator>,
    poller: Arc<StatusPoller>,
    store: Arc<dyn ClaimStore>,
    review: Arc<dyn ReviewQueue>,
    shutdown: CancellationToken,
}

impl fmt::Debug for ClaimService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimService")
            .field("connectors", &self.registry.len())
            .field("eligibility", &self.eligibility.is_some())
            .field("poller", &self.poller)
            .finish()
    }
}

impl ClaimService {
    pub fn builder(config: OrchestratorConfig) -> ClaimServiceBuilder {
        ClaimServiceBuilder::new(config)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectorRegistry> {
        &self.registry
    }

    pub fn eligibility(&self) -> Option<&EligibilityCache> {
        self.eligibility.as_ref()
    }

    pub fn poller(&self) -> &Arc<StatusPoller> {
        &self.poller
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        self.registry.health_snapshot()
    }

    /// Submit with the configured default strategy.
    pub async fn submit(&self, claim: ClaimSubmission) -> Result<SubmissionResult> {
        self.submit_claim(claim, self.config.routing.default_strategy)
            .await
    }

    /// Run a claim through the pipeline and return its single result.
    ///
    /// A claim id that already has a result returns that result without
    /// calling any connector. `Err` means the claim never reached a
    /// connector; connector failures are part of the returned result.
    pub async fn submit_claim(
        &self,
        claim: ClaimSubmission,
        strategy: RoutingStrategy,
    ) -> Result<SubmissionResult> {
        if let Some(existing) = self.store.result(&claim.claim_id).await? {
            debug!(
                target: "claims::service",
                claim_id = %claim.claim_id,
                status = %existing.status,
                "claim already submitted; returning stored result"
            );
            return Ok(existing);
        }

        let report = self.gate.validate(&claim);
        if report.has_hard_errors() {
            info!(
                target: "claims::service",
                claim_id = %claim.claim_id,
                errors = report.errors.len(),
                "claim blocked by validation"
            );
            return Err(ClaimError::validation(report));
        }

        let verified = self.eligibility_verified(&claim).await;
        let snapshot = self.registry.health_snapshot();
        let plan = self.selector.select(&claim, &report, &snapshot, strategy);
        self.enforce_eligibility_mandate(&plan, &report, verified)?;

        if !self.store.save_claim(&claim).await? {
            return Err(ClaimError::Conflict(claim.claim_id.clone()));
        }
        self.gate.history().record(&claim);

        let mut placeholder = SubmissionResult::new(
            claim.claim_id.clone(),
            plan.strategy,
            SubmissionStatus::Pending,
            Utc::now(),
        );
        placeholder.diagnostics.push(Diagnostic {
            connector_id: None,
            kind: None,
            message: "submission in progress".to_string(),
        });
        self.store.put_result(&placeholder).await?;

        let run = SubmissionRun {
            orchestrator: Arc::clone(&self.orchestrator),
            store: Arc::clone(&self.store),
            review: Arc::clone(&self.review),
            poller: Arc::clone(&self.poller),
        };
        let claim_id = claim.claim_id.clone();
        let task = tokio::spawn(run.execute(claim, plan, report).in_current_span());
        match task.await {
            Ok(outcome) => outcome,
            Err(err) => Err(ClaimError::Internal(format!(
                "submission task for {claim_id} did not finish: {err}"
            ))),
        }
    }

    pub async fn get_claim_status(&self, claim_id: &ClaimId) -> Result<SubmissionResult> {
        self.store
            .result(claim_id)
            .await?
            .ok_or_else(|| ClaimError::NotFound(claim_id.clone()))
    }

    /// Restart polling for every stored pending result, e.g. after a
    /// restart against a durable store. Returns how many were picked up.
    pub async fn resume_pending(&self) -> Result<usize> {
        let pending = self.store.pending_results().await?;
        Ok(pending.iter().filter(|r| self.poller.track(r)).count())
    }

    /// Stop background polling. Stored results stay as they are.
    pub fn shutdown(&self) {
        info!(target: "claims::service", active = self.poller.active(), "stopping status polling");
        self.shutdown.cancel();
    }

    async fn eligibility_verified(&self, claim: &ClaimSubmission) -> bool {
        let Some(cache) = &self.eligibility else {
            return false;
        };
        let key = EligibilityKey::new(
            claim.patient_id.clone(),
            claim.payer_id.clone(),
            claim.service_date,
        );
        match cache.check(&key).await {
            Ok(record) => record.is_verified(),
            Err(err) => {
                warn!(
                    target: "claims::eligibility",
                    claim_id = %claim.claim_id,
                    error = %err,
                    "eligibility check failed"
                );
                false
            }
        }
    }

    fn enforce_eligibility_mandate(
        &self,
        plan: &SubmissionPlan,
        report: &ValidationReport,
        verified: bool,
    ) -> Result<()> {
        if verified {
            return Ok(());
        }
        let demanding = plan.targets.iter().find(|id| {
            self.registry
                .get(id)
                .is_some_and(|c| c.descriptor().requires_eligibility)
        });
        match demanding {
            Some(id) => Err(ClaimError::validation(report.with_error(
                ValidationIssue::new(
                    "eligibility",
                    IssueCode::EligibilityRequired,
                    format!("eligibility verification required by {id}"),
                ),
            ))),
            None => Ok(()),
        }
    }
}

/// One claim's execution, detached from the caller.
struct SubmissionRun {
    orchestrator: Arc<SubmissionOrchestrator>,
    store: Arc<dyn ClaimStore>,
    review: Arc<dyn ReviewQueue>,
    poller: Arc<StatusPoller>,
}

impl SubmissionRun {
    async fn execute(
        self,
        claim: ClaimSubmission,
        plan: SubmissionPlan,
        report: ValidationReport,
    ) -> Result<SubmissionResult> {
        let outcome = AssertUnwindSafe(self.orchestrator.execute(&claim, &plan, &report))
            .catch_unwind()
            .await;
        let failure = match outcome {
            Ok(Ok(result)) => match self.store.put_result(&result).await {
                Ok(()) => {
                    if result.status == SubmissionStatus::Pending {
                        self.poller.track(&result);
                    }
                    return Ok(result);
                }
                Err(err) => err,
            },
            Ok(Err(err)) => err,
            Err(_) => ClaimError::Internal("claim execution panicked".to_string()),
        };
        self.record_failure(&claim, &plan, &failure).await;
        Err(failure)
    }

    /// Settle the stored placeholder from whatever attempts were committed
    /// before execution failed.
    async fn record_failure(
        &self,
        claim: &ClaimSubmission,
        plan: &SubmissionPlan,
        failure: &ClaimError,
    ) {
        error!(
            target: "claims::service",
            claim_id = %claim.claim_id,
            error = %failure,
            "claim execution failed"
        );
        let attempts = match self.store.attempts(&claim.claim_id).await {
            Ok(attempts) => attempts,
            Err(err) => {
                warn!(target: "claims::service", error = %err, "attempt log unavailable");
                Vec::new()
            }
        };
        let folded = aggregate(&attempts, &plan.skipped, plan.mode);
        // A partial attempt set can only prove a positive answer.
        let status = match folded.status {
            status @ (SubmissionStatus::Accepted
            | SubmissionStatus::PartiallyApproved
            | SubmissionStatus::Pending) => status,
            _ => SubmissionStatus::Error,
        };
        let mut result = SubmissionResult::new(
            claim.claim_id.clone(),
            plan.strategy,
            status,
            Utc::now(),
        );
        if status != SubmissionStatus::Error {
            result.authoritative_attempt = folded.authoritative;
        }
        result.attempts = attempts;
        result.diagnostics = folded.diagnostics;
        result.diagnostics.push(Diagnostic {
            connector_id: None,
            kind: None,
            message: format!("submission did not complete: {failure}"),
        });

        if let Err(err) = self.store.put_result(&result).await {
            error!(target: "claims::service", claim_id = %claim.claim_id, error = %err, "could not record failed execution");
            return;
        }
        if status == SubmissionStatus::Pending {
            self.poller.track(&result);
        }
        let ticket = ReviewTicket::new(
            claim.claim_id.clone(),
            ReviewReason::ManualReconciliation,
            result.diagnostics.clone(),
        );
        if let Err(err) = self.review.enqueue(ticket).await {
            warn!(target: "claims::service", error = %err, "could not file reconciliation ticket");
        }
    }
}

/// Assembles a [`ClaimService`]. Every collaborator defaults to its
/// in-memory adapter; the default history forgets claims older than
/// `validation.history_retention_days`.
#[derive(Default)]
pub struct ClaimServiceBuilder {
    config: OrchestratorConfig,
    connectors: Vec<Arc<dyn Connector>>,
    verifier: Option<Arc<dyn EligibilityVerifier>>,
    store: Option<Arc<dyn ClaimStore>>,
    review: Option<Arc<dyn ReviewQueue>>,
    history: Option<Arc<dyn ClaimHistory>>,
    stats: Option<Arc<PayerStats>>,
    shutdown: Option<CancellationToken>,
}

impl fmt::Debug for ClaimServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimServiceBuilder")
            .field("connectors", &self.connectors.len())
            .field("verifier", &self.verifier.is_some())
            .field("store", &self.store.is_some())
            .field("review", &self.review.is_some())
            .field("history", &self.history.is_some())
            .finish()
    }
}

impl ClaimServiceBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors.push(connector);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn EligibilityVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ClaimStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_review_queue(mut self, review: Arc<dyn ReviewQueue>) -> Self {
        self.review = Some(review);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn ClaimHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_stats(mut self, stats: Arc<PayerStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    pub fn build(self) -> Result<ClaimService> {
        let config = self.config;
        let mut registry =
            ConnectorRegistry::new(config.retry, config.breaker);
        for connector in self.connectors {
            registry.register(connector)?;
        }
        let registry = Arc::new(registry);

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryClaimStore::new()));
        let review = self
            .review
            .unwrap_or_else(|| Arc::new(InMemoryReviewQueue::new()));
        let history = self.history.unwrap_or_else(|| {
            Arc::new(InMemoryClaimHistory::with_retention(
                config.validation.history_retention(),
            ))
        });
        let stats = self.stats.unwrap_or_default();
        let shutdown = self.shutdown.unwrap_or_default();

        let gate = ValidationGate::new(config.validation.clone(), history);
        let eligibility = self
            .verifier
            .map(|verifier| EligibilityCache::new(verifier, &config.eligibility));
        let selector = RoutingSelector::new(Arc::clone(&stats));
        let orchestrator = Arc::new(SubmissionOrchestrator::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            Arc::clone(&review),
            stats,
            config.routing.parallel_timeout(),
        ));
        let poller = Arc::new(StatusPoller::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            Arc::clone(&review),
            PollSchedule::new(&config.poller),
            shutdown.child_token(),
        ));

        info!(
            target: "claims::service",
            connectors = registry.len(),
            eligibility = eligibility.is_some(),
            default_strategy = %config.routing.default_strategy,
            "claim service ready"
        );

        Ok(ClaimService {
            config,
            gate,
            eligibility,
            registry,
            selector,
            orchestrator,
            poller,
            store,
            review,
            shutdown,
        })
    }
}
